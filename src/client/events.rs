//! Sync event bus
//!
//! Fan-out of everything the UI layer may want to react to: channel status
//! and data changes, terminal channel failures, queue length changes and
//! replay results. Built on `tokio::sync::broadcast`; publishing never fails
//! and slow observers only miss events (they can always re-query state).

use crate::client::offline::queue::ActionKind;
use crate::client::sync::state::{ChannelKey, ChannelState};
use tokio::sync::broadcast;

/// Default number of buffered events per observer
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Observable event emitted by the sync core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A channel moved to a new connection state
    ChannelStatus { key: ChannelKey, state: ChannelState },
    /// A channel's local collection changed
    ChannelData {
        key: ChannelKey,
        len: usize,
        new_items: usize,
    },
    /// A channel exhausted its reconnect attempts
    ChannelFailed { key: ChannelKey, error: String },
    /// The offline queue changed length
    QueueChanged { pending: usize },
    /// A replay run finished
    QueueProcessed { synced: usize, failed: usize },
    /// A queued action was abandoned and its mutation is lost
    ActionDropped {
        id: String,
        kind: ActionKind,
        error: String,
    },
    /// The connectivity signal flipped
    Connectivity { online: bool },
}

/// Cloneable publisher handle
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish to current observers; a bus without observers drops the event
    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!("[BUS] {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
