//! # Replay Scheduler
//!
//! Background task that decides when the queue processor runs.
//!
//! ## Triggers
//!
//! - **Startup**: one delayed run when the restored queue is non-empty
//! - **Reconnect**: an offline → online transition, after a settle delay
//!   and only if the client is still online afterwards
//!
//! The foreground trigger lives on `OfflineManager::notify_foreground`,
//! since it is driven by the UI rather than by connectivity.

use crate::client::config::SyncSettings;
use crate::client::offline::handlers::ReplayHandlers;
use crate::client::offline::processor::QueueProcessor;
use crate::client::sync::network_monitor::ConnectivityProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Replay scheduler
#[derive(Debug, Clone, Copy)]
pub struct ReplayScheduler {
    /// Wait before the startup run
    startup_delay: Duration,
    /// Wait after connectivity returns before replaying
    settle_delay: Duration,
}

impl ReplayScheduler {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            startup_delay: settings.replay_startup_delay,
            settle_delay: settings.replay_settle_delay,
        }
    }

    /// Start the scheduler task
    pub fn spawn(
        self,
        processor: Arc<QueueProcessor>,
        handlers: ReplayHandlers,
        connectivity: Arc<dyn ConnectivityProvider>,
    ) -> SchedulerHandle {
        let task = tokio::spawn(async move {
            let mut rx = connectivity.watch();
            let mut was_online = *rx.borrow_and_update();

            if !processor.queue().is_empty().await {
                tracing::debug!(
                    "[REPLAY] Pending actions at startup, replaying in {:?}",
                    self.startup_delay
                );
                tokio::time::sleep(self.startup_delay).await;
                processor.process(&handlers).await;
            }

            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    tokio::time::sleep(self.settle_delay).await;
                    if connectivity.is_online() {
                        processor.process(&handlers).await;
                    } else {
                        tracing::debug!("[REPLAY] Connectivity flapped during settle delay");
                    }
                }
                was_online = *rx.borrow_and_update();
            }

            tracing::debug!("[REPLAY] Connectivity source closed, scheduler stopping");
        });

        SchedulerHandle { task }
    }
}

/// Owner of a running scheduler; dropping it stops the task
#[derive(Debug)]
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
