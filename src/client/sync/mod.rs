//! # Sync Manager
//!
//! Keeps local replicas of remote collections current.
//!
//! ## Architecture
//!
//! - **State**: channel keys, configurations, state machine and views
//! - **Reconciler**: ordered, id-unique local collection
//! - **Channel**: one collection plus its observable view
//! - **Drivers**: event-stream and polling tasks, one per channel
//! - **Network Monitor**: injected connectivity signal
//!
//! ## Registry
//!
//! Channels live in a registry keyed by `ChannelKey` (collection id plus
//! filter). Subscribing to a key that is already registered attaches to the
//! existing channel, so two consumers of the same data share one transport.
//! Every `Subscription` counts as one reference; when the last one is
//! dropped or unsubscribed the channel is closed and its driver aborted.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kinsync::client::sync::{ChannelConfig, SyncManager};
//! use kinsync::shared::models::Person;
//!
//! # async fn example(manager: SyncManager) -> Result<(), kinsync::shared::SyncError> {
//! let mut tree = manager.subscribe::<Person>(ChannelConfig::family_tree())?;
//!
//! while let Ok(view) = tree.changed().await {
//!     println!("{} people, {} new", view.items.len(), view.new_items);
//! }
//! # Ok(())
//! # }
//! ```

pub(crate) mod channel;
pub(crate) mod event_stream;
pub mod network_monitor;
pub(crate) mod polling;
pub mod reconciler;
pub mod state;

pub use network_monitor::{ConnectivityProvider, NetworkMonitor};
pub use reconciler::{Collection, Reconciled};
pub use state::{ChannelConfig, ChannelKey, ChannelState, ChannelView, PollInterval, StrategyKind};

use crate::client::api::SyncApi;
use crate::client::config::SyncSettings;
use crate::client::events::{EventBus, SyncEvent};
use crate::shared::error::SyncError;
use crate::shared::models::SyncItem;
use channel::{Channel, ChannelControl, DriverContext};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct RegistryEntry {
    control: Arc<dyn ChannelControl>,
    typed: Arc<dyn Any + Send + Sync>,
    subscribers: HashSet<Uuid>,
    driver: JoinHandle<()>,
}

impl RegistryEntry {
    fn shut_down(self) {
        self.control.close();
        self.driver.abort();
    }
}

#[derive(Default)]
struct Registry {
    entries: Mutex<HashMap<ChannelKey, RegistryEntry>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop one reference; closes the channel when it was the last
    fn release(&self, key: &ChannelKey, subscriber: Uuid) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !entry.subscribers.remove(&subscriber) {
            return;
        }
        tracing::debug!(
            "[SYNC] {} subscriber left ({} remaining)",
            key,
            entry.subscribers.len()
        );
        if entry.subscribers.is_empty() {
            if let Some(entry) = entries.remove(key) {
                tracing::info!("[SYNC] {} closed, last subscriber left", key);
                entry.shut_down();
            }
        }
    }

    fn len_of(&self, key: &ChannelKey) -> usize {
        self.lock().get(key).map(|entry| entry.control.len()).unwrap_or(0)
    }
}

/// Owner of every active channel
pub struct SyncManager {
    registry: Arc<Registry>,
    ctx: DriverContext,
    bus: EventBus,
}

impl SyncManager {
    pub fn new(
        api: Arc<dyn SyncApi>,
        connectivity: Arc<dyn ConnectivityProvider>,
        settings: SyncSettings,
        bus: EventBus,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            ctx: DriverContext {
                api,
                connectivity,
                settings,
            },
            bus,
        }
    }

    /// Observe every sync event
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    /// Create the channel for `config.key` or attach to the existing one
    pub fn subscribe<T: SyncItem>(&self, config: ChannelConfig) -> Result<Subscription<T>, SyncError> {
        let subscriber = Uuid::new_v4();
        let mut entries = self.registry.lock();

        if let Some(entry) = entries.get_mut(&config.key) {
            let channel = entry
                .typed
                .clone()
                .downcast::<Channel<T>>()
                .map_err(|_| SyncError::TypeMismatch {
                    key: config.key.to_string(),
                })?;
            if entry.control.state() == ChannelState::Closed {
                return Err(SyncError::ChannelClosed(config.key.to_string()));
            }
            entry.subscribers.insert(subscriber);
            tracing::debug!(
                "[SYNC] {} attached subscriber ({} total)",
                config.key,
                entry.subscribers.len()
            );
            return Ok(Subscription::new(subscriber, channel, &self.registry));
        }

        let key = config.key.clone();
        tracing::info!("[SYNC] {} opening {:?} channel", key, config.strategy);
        let channel = Arc::new(Channel::<T>::new(config, self.bus.clone()));
        let control: Arc<dyn ChannelControl> = channel.clone();
        let driver = control.clone().spawn_driver(self.ctx.clone());

        entries.insert(
            key,
            RegistryEntry {
                control,
                typed: channel.clone(),
                subscribers: HashSet::from([subscriber]),
                driver,
            },
        );
        Ok(Subscription::new(subscriber, channel, &self.registry))
    }

    /// Release a subscription; same as dropping it
    pub fn unsubscribe<T: SyncItem>(&self, subscription: Subscription<T>) {
        drop(subscription);
    }

    /// Live collection sizes for `keys`; unknown keys count as zero
    pub fn aggregate_counts(&self, keys: &[ChannelKey]) -> AggregateCounts {
        AggregateCounts {
            keys: keys.to_vec(),
            registry: Arc::downgrade(&self.registry),
            events: self.bus.subscribe(),
        }
    }

    pub fn status(&self, key: &ChannelKey) -> Option<ChannelState> {
        self.registry.lock().get(key).map(|entry| entry.control.state())
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.registry
            .lock()
            .get(key)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Keys of every open channel
    pub fn channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.registry.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Restart a channel's transport now, including from terminal `Error`
    pub fn reconnect(&self, key: &ChannelKey) -> Result<(), SyncError> {
        let mut entries = self.registry.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| SyncError::UnknownChannel(key.to_string()))?;

        tracing::info!("[SYNC] {} manual reconnect", key);
        entry.driver.abort();
        entry.control.prepare_reconnect();
        entry.driver = entry.control.clone().spawn_driver(self.ctx.clone());
        Ok(())
    }

    /// Close every channel
    pub fn shutdown(&self) {
        let entries: Vec<RegistryEntry> = self.registry.lock().drain().map(|(_, e)| e).collect();
        if !entries.is_empty() {
            tracing::info!("[SYNC] Shutting down {} channel(s)", entries.len());
        }
        for entry in entries {
            entry.shut_down();
        }
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncManager")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

/// One consumer's reference to a channel
pub struct Subscription<T: SyncItem> {
    id: Uuid,
    channel: Arc<Channel<T>>,
    view: watch::Receiver<ChannelView<T>>,
    registry: Weak<Registry>,
}

impl<T: SyncItem> Subscription<T> {
    fn new(id: Uuid, channel: Arc<Channel<T>>, registry: &Arc<Registry>) -> Self {
        let view = channel.watch();
        Self {
            id,
            channel,
            view,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &ChannelKey {
        self.channel.key()
    }

    /// Receiver that observes every change of the view
    pub fn watch(&self) -> watch::Receiver<ChannelView<T>> {
        self.view.clone()
    }

    /// Current items in channel order
    pub fn items(&self) -> Arc<Vec<T>> {
        self.view.borrow().items.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.view.borrow().state
    }

    pub fn new_item_count(&self) -> usize {
        self.view.borrow().new_items
    }

    pub fn snapshot(&self) -> ChannelView<T> {
        self.view.borrow().clone()
    }

    /// Reset the new-item badge
    pub fn clear_new_items(&self) {
        self.channel.clear_new_items();
    }

    /// Wait for the next change of the view
    pub async fn changed(&mut self) -> Result<ChannelView<T>, SyncError> {
        self.view
            .changed()
            .await
            .map_err(|_| SyncError::ChannelClosed(self.channel.key().to_string()))?;
        let view = self.view.borrow_and_update().clone();
        if view.state == ChannelState::Closed {
            return Err(SyncError::ChannelClosed(self.channel.key().to_string()));
        }
        Ok(view)
    }
}

impl<T: SyncItem> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.channel.key(), self.id);
        }
    }
}

impl<T: SyncItem> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", self.key())
            .field("state", &self.state())
            .finish()
    }
}

/// Live view over the sizes of several channels
pub struct AggregateCounts {
    keys: Vec<ChannelKey>,
    registry: Weak<Registry>,
    events: broadcast::Receiver<SyncEvent>,
}

impl AggregateCounts {
    /// Current size of every watched channel
    pub fn current(&self) -> HashMap<ChannelKey, usize> {
        let registry = self.registry.upgrade();
        self.keys
            .iter()
            .map(|key| {
                let len = registry.as_ref().map(|r| r.len_of(key)).unwrap_or(0);
                (key.clone(), len)
            })
            .collect()
    }

    pub fn total(&self) -> usize {
        self.current().values().sum()
    }

    /// Wait until a watched channel changes; `None` once the manager is gone
    pub async fn changed(&mut self) -> Option<HashMap<ChannelKey, usize>> {
        loop {
            let event = self.events.recv().await;
            match event {
                Ok(SyncEvent::ChannelData { key, .. }) | Ok(SyncEvent::ChannelStatus { key, .. })
                    if self.keys.contains(&key) =>
                {
                    return Some(self.current());
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => return Some(self.current()),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
