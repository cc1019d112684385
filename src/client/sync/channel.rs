//! Channel: one local collection plus its observable state
//!
//! The driver task of a channel (polling or event stream) is the only
//! writer of data and connection state; the registry only closes channels
//! and prepares them for a manual reconnect. Data is applied under the
//! collection lock after checking the channel is still open, so nothing
//! lands after the last subscriber left.

use crate::client::api::SyncApi;
use crate::client::config::SyncSettings;
use crate::client::events::{EventBus, SyncEvent};
use crate::client::sync::network_monitor::ConnectivityProvider;
use crate::client::sync::reconciler::{Collection, Reconciled};
use crate::client::sync::state::{
    ChannelConfig, ChannelKey, ChannelState, ChannelView, StrategyKind,
};
use crate::client::sync::{event_stream, polling};
use crate::shared::event::StreamEvent;
use crate::shared::models::SyncItem;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Collaborators a channel driver needs
#[derive(Clone)]
pub(crate) struct DriverContext {
    pub api: Arc<dyn SyncApi>,
    pub connectivity: Arc<dyn ConnectivityProvider>,
    pub settings: SyncSettings,
}

/// Type-erased handle the registry keeps for every channel
pub(crate) trait ChannelControl: Send + Sync {
    fn key(&self) -> &ChannelKey;

    fn state(&self) -> ChannelState;

    fn len(&self) -> usize;

    fn close(&self);

    /// Put the channel in a state its driver can start from
    fn prepare_reconnect(&self);

    fn spawn_driver(self: Arc<Self>, ctx: DriverContext) -> JoinHandle<()>;
}

pub(crate) struct Channel<T: SyncItem> {
    config: ChannelConfig,
    collection: Mutex<Collection<T>>,
    view: watch::Sender<ChannelView<T>>,
    bus: EventBus,
}

impl<T: SyncItem> Channel<T> {
    pub fn new(config: ChannelConfig, bus: EventBus) -> Self {
        let (view, _) = watch::channel(ChannelView::idle());
        Self {
            config,
            collection: Mutex::new(Collection::new()),
            view,
            bus,
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.config.key
    }

    pub fn state(&self) -> ChannelState {
        self.view.borrow().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    pub fn watch(&self) -> watch::Receiver<ChannelView<T>> {
        self.view.subscribe()
    }

    pub fn view(&self) -> ChannelView<T> {
        self.view.borrow().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Collection<T>> {
        self.collection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&self, next: ChannelState) -> bool {
        let mut previous = next;
        let moved = self.view.send_if_modified(|view| {
            if !view.state.can_transition_to(next) {
                previous = view.state;
                return false;
            }
            previous = view.state;
            view.state = next;
            if next != ChannelState::Error {
                view.terminal = false;
            }
            true
        });

        if moved {
            tracing::info!("[SYNC] {} {} -> {}", self.key(), previous, next);
            self.bus.publish(SyncEvent::ChannelStatus {
                key: self.key().clone(),
                state: next,
            });
        } else if previous != next {
            tracing::debug!("[SYNC] {} ignored transition {} -> {}", self.key(), previous, next);
        }
        moved
    }

    /// Record a failed attempt; `terminal` once reconnects are exhausted
    pub fn fail(&self, error: String, terminal: bool) -> bool {
        if !self.transition(ChannelState::Error) {
            return false;
        }
        self.view.send_modify(|view| {
            view.last_error = Some(error.clone());
            view.terminal = terminal;
        });

        if terminal {
            tracing::error!("[SYNC] {} giving up: {}", self.key(), error);
            self.bus.publish(SyncEvent::ChannelFailed {
                key: self.key().clone(),
                error,
            });
        } else {
            tracing::warn!("[SYNC] {} attempt failed: {}", self.key(), error);
        }
        true
    }

    /// Apply one incremental or snapshot event
    pub fn apply(&self, event: StreamEvent<T>) -> Reconciled {
        let mut collection = self.lock();
        if self.is_closed() {
            return Reconciled::Unchanged;
        }
        let result = collection.apply(event);
        if result.changed() {
            self.publish(&collection);
        }
        result
    }

    /// Replace the collection wholesale
    pub fn replace(&self, items: Vec<T>) {
        let mut collection = self.lock();
        if self.is_closed() {
            return;
        }
        collection.replace_all(items);
        self.publish(&collection);
    }

    pub fn clear_new_items(&self) {
        let mut collection = self.lock();
        if collection.new_item_count() == 0 {
            return;
        }
        collection.clear_new_items();
        self.publish(&collection);
    }

    fn publish(&self, collection: &Collection<T>) {
        let items = Arc::new(collection.items().to_vec());
        let new_items = collection.new_item_count();
        self.view.send_modify(|view| {
            view.items = items;
            view.new_items = new_items;
            view.last_synced_at = Some(Utc::now());
        });
        self.bus.publish(SyncEvent::ChannelData {
            key: self.key().clone(),
            len: collection.len(),
            new_items,
        });
    }
}

impl<T: SyncItem> ChannelControl for Channel<T> {
    fn key(&self) -> &ChannelKey {
        Channel::key(self)
    }

    fn state(&self) -> ChannelState {
        Channel::state(self)
    }

    fn len(&self) -> usize {
        self.view.borrow().items.len()
    }

    fn close(&self) {
        let _collection = self.lock();
        self.transition(ChannelState::Closed);
    }

    fn prepare_reconnect(&self) {
        match Channel::state(self) {
            ChannelState::Connecting => {
                self.transition(ChannelState::Error);
                self.transition(ChannelState::Reconnecting);
            }
            ChannelState::Connected | ChannelState::Error => {
                self.transition(ChannelState::Reconnecting);
            }
            ChannelState::Idle | ChannelState::Reconnecting | ChannelState::Closed => {}
        }
    }

    fn spawn_driver(self: Arc<Self>, ctx: DriverContext) -> JoinHandle<()> {
        match self.config.strategy {
            StrategyKind::EventStream => tokio::spawn(event_stream::run(self, ctx)),
            StrategyKind::Polling { interval } => tokio::spawn(polling::run(self, ctx, interval)),
        }
    }
}
