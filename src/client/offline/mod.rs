//! # Offline Mutation System
//!
//! Lets the client keep editing while disconnected and replays the edits
//! once connectivity returns.
//!
//! ## Architecture
//!
//! - **Storage**: whole-value key-value backend for the queue
//! - **Queue**: durable, ordered list of pending mutations
//! - **Handlers**: per-kind executors that turn an action into API calls
//! - **Processor**: single-flight replay with bounded retries
//! - **Scheduler**: startup and reconnect replay triggers
//! - **Retry**: backoff strategies shared with the channel drivers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kinsync::client::offline::{MutationPayload, OfflineManager, SubmitOutcome};
//! use kinsync::client::offline::queue::ActionKind;
//! use serde_json::json;
//!
//! # async fn example(offline: OfflineManager) -> Result<(), kinsync::shared::ReplayError> {
//! let payload = MutationPayload::create("persons", json!({"firstName": "Ada"}));
//! match offline.submit(ActionKind::Add, payload.to_value()).await? {
//!     SubmitOutcome::Applied { server_id } => println!("saved as {:?}", server_id),
//!     SubmitOutcome::Queued { action_id } => println!("queued as {}", action_id),
//! }
//! # Ok(())
//! # }
//! ```

pub mod handlers;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod storage;

pub use handlers::{handler_fn, ApiReplayHandler, MutationPayload, ReplayHandler, ReplayHandlers};
pub use metrics::ReplayMetrics;
pub use processor::{ProcessOutcome, QueueProcessor};
pub use queue::{ActionKind, OfflineQueue, QueuedAction, RetryDecision};
pub use retry::{Backoff, BackoffStrategy};
pub use scheduler::{ReplayScheduler, SchedulerHandle};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

use crate::client::config::SyncSettings;
use crate::client::events::EventBus;
use crate::client::sync::network_monitor::ConnectivityProvider;
use crate::shared::error::ReplayError;
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Result of submitting a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server accepted the mutation right away
    Applied { server_id: Option<String> },
    /// The mutation was queued for a later replay
    Queued { action_id: String },
}

/// Entry point for local mutations
pub struct OfflineManager {
    queue: Arc<OfflineQueue>,
    processor: Arc<QueueProcessor>,
    connectivity: Arc<dyn ConnectivityProvider>,
    handlers: ReplayHandlers,
    settings: SyncSettings,
}

impl OfflineManager {
    pub fn new(
        queue: Arc<OfflineQueue>,
        connectivity: Arc<dyn ConnectivityProvider>,
        handlers: ReplayHandlers,
        bus: EventBus,
        settings: SyncSettings,
    ) -> Self {
        let processor = Arc::new(QueueProcessor::new(
            queue.clone(),
            connectivity.clone(),
            bus,
        ));
        Self {
            queue,
            processor,
            connectivity,
            handlers,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.processor
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.len().await
    }

    pub async fn metrics(&self) -> ReplayMetrics {
        self.processor.metrics().await
    }

    /// Apply a mutation now, or queue it when that is not possible.
    ///
    /// Offline submissions and retryable failures are queued; any other
    /// failure is returned to the caller and nothing is queued.
    pub async fn submit(&self, kind: ActionKind, payload: Value) -> Result<SubmitOutcome, ReplayError> {
        if !self.connectivity.is_online() {
            let action_id = self.queue.enqueue(kind, payload).await;
            return Ok(SubmitOutcome::Queued { action_id });
        }

        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| ReplayError::MissingHandler(kind.to_string()))?;

        let attempt = QueuedAction {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        };
        let result = AssertUnwindSafe(handler.replay(&attempt))
            .catch_unwind()
            .await
            .unwrap_or(Err(ReplayError::Panicked));

        match result {
            Ok(server_id) => Ok(SubmitOutcome::Applied { server_id }),
            Err(error) if error.is_retryable() => {
                tracing::warn!("[QUEUE] Direct {} failed, queueing: {}", kind, error);
                let action_id = self.queue.enqueue(kind, attempt.payload).await;
                Ok(SubmitOutcome::Queued { action_id })
            }
            Err(error) => Err(error),
        }
    }

    /// Replay the queue now
    pub async fn process_queue(&self) -> ProcessOutcome {
        self.processor.process(&self.handlers).await
    }

    /// The UI became visible again
    pub async fn notify_foreground(&self) -> ProcessOutcome {
        if !self.connectivity.is_online() || self.queue.is_empty().await {
            return ProcessOutcome::default();
        }
        self.process_queue().await
    }

    /// Discard every pending mutation
    pub async fn clear_queue(&self) {
        self.queue.clear().await;
    }

    /// Start the startup/reconnect replay triggers
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        ReplayScheduler::new(&self.settings).spawn(
            self.processor.clone(),
            self.handlers.clone(),
            self.connectivity.clone(),
        )
    }
}
