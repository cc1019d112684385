//! # Queue Processor
//!
//! Replays queued actions against their handlers.
//!
//! A run takes a snapshot of the queue (oldest first) and walks it in order:
//!
//! - no handler for the kind: the action is dropped and counted as failed
//! - handler success: the action is dequeued and counted as synced
//! - handler failure or panic: the retry count goes up; the action is only
//!   counted as failed when that drops it, and not at all when it was
//!   removed from the queue while its handler ran
//!
//! At most one run is in flight; overlapping calls return zero counts
//! immediately, as does a call made while offline.

use crate::client::events::{EventBus, SyncEvent};
use crate::client::offline::handlers::ReplayHandlers;
use crate::client::offline::metrics::ReplayMetrics;
use crate::client::offline::queue::{OfflineQueue, QueuedAction, RetryDecision};
use crate::client::sync::network_monitor::ConnectivityProvider;
use crate::shared::error::ReplayError;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Counts of one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub synced: usize,
    pub failed: usize,
}

/// Clears the in-flight flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct QueueProcessor {
    queue: Arc<OfflineQueue>,
    connectivity: Arc<dyn ConnectivityProvider>,
    running: AtomicBool,
    metrics: RwLock<ReplayMetrics>,
    bus: EventBus,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<OfflineQueue>,
        connectivity: Arc<dyn ConnectivityProvider>,
        bus: EventBus,
    ) -> Self {
        Self {
            queue,
            connectivity,
            running: AtomicBool::new(false),
            metrics: RwLock::new(ReplayMetrics::new()),
            bus,
        }
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn metrics(&self) -> ReplayMetrics {
        self.metrics.read().await.clone()
    }

    /// Replay every queued action once
    pub async fn process(&self, handlers: &ReplayHandlers) -> ProcessOutcome {
        if !self.connectivity.is_online() {
            tracing::debug!("[REPLAY] Offline, skipping replay");
            self.metrics.write().await.record_skipped();
            return ProcessOutcome::default();
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("[REPLAY] Replay already in progress, skipping");
            self.metrics.write().await.record_skipped();
            return ProcessOutcome::default();
        }
        let _guard = RunGuard(&self.running);

        self.metrics.write().await.record_run_start();
        let actions = self.queue.peek_all().await;
        if !actions.is_empty() {
            tracing::info!("[REPLAY] Replaying {} queued action(s)", actions.len());
        }

        let mut outcome = ProcessOutcome::default();
        for action in actions {
            if !self.connectivity.is_online() {
                tracing::info!("[REPLAY] Connectivity lost, stopping replay early");
                break;
            }

            let Some(handler) = handlers.get(action.kind) else {
                let error = ReplayError::MissingHandler(action.kind.to_string());
                tracing::warn!("[REPLAY] Dropping action {}: {}", action.id, error);
                self.queue.dequeue(&action.id).await;
                outcome.failed += 1;
                self.report_dropped(&action, &error);
                continue;
            };

            let result = AssertUnwindSafe(handler.replay(&action))
                .catch_unwind()
                .await
                .unwrap_or(Err(ReplayError::Panicked));

            match result {
                Ok(server_id) => {
                    tracing::info!(
                        "[REPLAY] Replayed {} action {}{}",
                        action.kind,
                        action.id,
                        server_id
                            .map(|id| format!(" (server id {})", id))
                            .unwrap_or_default()
                    );
                    self.queue.dequeue(&action.id).await;
                    outcome.synced += 1;
                }
                Err(error) => match self.queue.increment_retry(&action.id).await {
                    RetryDecision::Keep => {
                        tracing::warn!(
                            "[REPLAY] Action {} failed (attempt {}), will retry: {}",
                            action.id,
                            action.retry_count + 1,
                            error
                        );
                    }
                    RetryDecision::Drop => {
                        outcome.failed += 1;
                        self.report_dropped(&action, &error);
                    }
                    RetryDecision::Gone => {
                        tracing::debug!(
                            "[REPLAY] Action {} left the queue during replay: {}",
                            action.id,
                            error
                        );
                    }
                },
            }
        }

        self.metrics
            .write()
            .await
            .record_run_end(outcome.synced, outcome.failed);
        self.bus.publish(SyncEvent::QueueProcessed {
            synced: outcome.synced,
            failed: outcome.failed,
        });
        tracing::info!(
            "[REPLAY] Replay finished: {} synced, {} failed",
            outcome.synced,
            outcome.failed
        );
        outcome
    }

    fn report_dropped(&self, action: &QueuedAction, error: &ReplayError) {
        tracing::error!(
            "[REPLAY] Action {} ({}) permanently failed: {}",
            action.id,
            action.kind,
            error
        );
        self.bus.publish(SyncEvent::ActionDropped {
            id: action.id.clone(),
            kind: action.kind,
            error: error.to_string(),
        });
    }
}
