//! # Network Monitor
//!
//! Process-wide connectivity signal.
//!
//! ## Features
//!
//! - **Injected Provider**: consumers depend on `ConnectivityProvider`, never
//!   on a global
//! - **Real-time Updates**: every transition is pushed through a `watch`
//!   channel and announced on the event bus
//! - **Reachability Probe**: optional background task that marks the client
//!   offline while a health URL is unreachable

use crate::client::events::{EventBus, SyncEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Source of the connectivity signal
pub trait ConnectivityProvider: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every transition
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Wait until `rx` reports online; false if the provider went away
pub async fn wait_until_online(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|online| *online).await.is_ok()
}

#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
    bus: Option<EventBus>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx, bus: None }
    }

    /// Announce transitions as `SyncEvent::Connectivity`
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Record the platform's view of connectivity; repeats are ignored
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("[NET] Connectivity restored");
            } else {
                tracing::warn!("[NET] Connectivity lost");
            }
            if let Some(bus) = &self.bus {
                bus.publish(SyncEvent::Connectivity { online });
            }
        }
    }

    /// Poll `url` every `interval`; any HTTP response counts as online
    pub fn spawn_probe(
        self: &Arc<Self>,
        client: reqwest::Client,
        url: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let reachable = client.get(&url).timeout(interval).send().await.is_ok();
                tracing::trace!("[NET] Probe {} reachable={}", url, reachable);
                monitor.set_online(reachable);
                tokio::time::sleep(interval).await;
            }
        })
    }
}

impl ConnectivityProvider for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
