//! # Offline Action Queue
//!
//! Durable list of mutations that could not be applied immediately.
//!
//! ## Features
//!
//! - **Persistent Queue**: the full list is written on every change, under
//!   one storage key, so it survives restarts
//! - **Replay Order**: `peek_all` returns actions oldest first; enqueue
//!   timestamps are strictly increasing within a process
//! - **Bounded Retries**: `increment_retry` drops an action once it reaches
//!   the retry bound
//! - **Degraded Mode**: a failing store only logs a warning; the in-memory
//!   queue keeps working for the session
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kinsync::client::events::EventBus;
//! use kinsync::client::offline::queue::{ActionKind, OfflineQueue};
//! use kinsync::client::offline::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let queue = OfflineQueue::load(Arc::new(MemoryStore::new()), EventBus::default(), 3).await;
//!
//! let id = queue.enqueue(ActionKind::Add, serde_json::json!({"firstName": "Ada"})).await;
//! for action in queue.peek_all().await {
//!     // replay action...
//!     queue.dequeue(&action.id).await;
//! }
//! # let _ = id;
//! # }
//! ```

use crate::client::config::QUEUE_STORAGE_KEY;
use crate::client::events::{EventBus, SyncEvent};
use crate::client::offline::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Kind of queued mutation; selects the replay handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Add,
    Edit,
    Delete,
    Suggestion,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::Add => "add",
            ActionKind::Edit => "edit",
            ActionKind::Delete => "delete",
            ActionKind::Suggestion => "suggestion",
        };
        f.write_str(label)
    }
}

/// A pending local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Generated at enqueue time
    pub id: String,
    pub kind: ActionKind,
    /// Interpreted only by the matching replay handler
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

/// Outcome of recording a failed replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The action stays queued for the next run
    Keep,
    /// The retry bound was reached and the action was removed
    Drop,
    /// The action was no longer queued (cleared or dequeued meanwhile)
    Gone,
}

/// Durable offline queue
pub struct OfflineQueue {
    actions: RwLock<Vec<QueuedAction>>,
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_retries: u32,
    bus: EventBus,
    degraded: AtomicBool,
}

impl fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("key", &self.key)
            .field("max_retries", &self.max_retries)
            .field("degraded", &self.is_persistence_degraded())
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    /// Load the queue stored under the default key
    pub async fn load(store: Arc<dyn KeyValueStore>, bus: EventBus, max_retries: u32) -> Self {
        Self::load_with_key(store, QUEUE_STORAGE_KEY, bus, max_retries).await
    }

    /// Load the queue stored under `key`; unreadable data is an empty queue
    pub async fn load_with_key(
        store: Arc<dyn KeyValueStore>,
        key: &str,
        bus: EventBus,
        max_retries: u32,
    ) -> Self {
        let actions = read_actions(store.as_ref(), key).await;
        if !actions.is_empty() {
            tracing::info!("[QUEUE] Restored {} pending action(s)", actions.len());
        }

        Self {
            actions: RwLock::new(actions),
            store,
            key: key.to_string(),
            max_retries: max_retries.max(1),
            bus,
            degraded: AtomicBool::new(false),
        }
    }

    /// Re-read the persisted list, replacing the in-memory copy
    pub async fn reload(&self) {
        let restored = read_actions(self.store.as_ref(), &self.key).await;
        let pending = {
            let mut actions = self.actions.write().await;
            *actions = restored;
            actions.len()
        };
        self.notify(pending);
    }

    /// Append a new action and return its id
    pub async fn enqueue(&self, kind: ActionKind, payload: Value) -> String {
        let id = Uuid::new_v4().to_string();

        let pending = {
            let mut actions = self.actions.write().await;
            let now = Utc::now();
            let enqueued_at = match actions.iter().map(|a| a.enqueued_at).max() {
                Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
                _ => now,
            };

            actions.push(QueuedAction {
                id: id.clone(),
                kind,
                payload,
                enqueued_at,
                retry_count: 0,
            });
            self.persist(&actions).await;
            actions.len()
        };

        tracing::info!("[QUEUE] Enqueued {} action {} ({} pending)", kind, id, pending);
        self.notify(pending);
        id
    }

    /// Remove an action; returns whether it was present
    pub async fn dequeue(&self, id: &str) -> bool {
        let pending = {
            let mut actions = self.actions.write().await;
            let before = actions.len();
            actions.retain(|action| action.id != id);
            if actions.len() == before {
                return false;
            }
            self.persist(&actions).await;
            actions.len()
        };

        tracing::debug!("[QUEUE] Dequeued action {} ({} pending)", id, pending);
        self.notify(pending);
        true
    }

    /// All actions, oldest first
    pub async fn peek_all(&self) -> Vec<QueuedAction> {
        let mut snapshot = self.actions.read().await.clone();
        snapshot.sort_by_key(|action| action.enqueued_at);
        snapshot
    }

    pub async fn get(&self, id: &str) -> Option<QueuedAction> {
        self.actions
            .read()
            .await
            .iter()
            .find(|action| action.id == id)
            .cloned()
    }

    /// Record a failed replay of `id`
    pub async fn increment_retry(&self, id: &str) -> RetryDecision {
        let (decision, pending) = {
            let mut actions = self.actions.write().await;
            let Some(pos) = actions.iter().position(|action| action.id == id) else {
                tracing::debug!("[QUEUE] Retry recorded for unknown action {}", id);
                return RetryDecision::Gone;
            };

            actions[pos].retry_count += 1;
            let decision = if actions[pos].retry_count >= self.max_retries {
                let dropped = actions.remove(pos);
                tracing::warn!(
                    "[QUEUE] Dropping {} action {} after {} failed attempts",
                    dropped.kind,
                    dropped.id,
                    dropped.retry_count
                );
                RetryDecision::Drop
            } else {
                RetryDecision::Keep
            };
            self.persist(&actions).await;
            (decision, actions.len())
        };

        if decision == RetryDecision::Drop {
            self.notify(pending);
        }
        decision
    }

    /// Remove every action (explicit user request only)
    pub async fn clear(&self) {
        {
            let mut actions = self.actions.write().await;
            if actions.is_empty() {
                return;
            }
            tracing::info!("[QUEUE] Clearing {} pending action(s)", actions.len());
            actions.clear();
            self.persist(&actions).await;
        }
        self.notify(0);
    }

    pub async fn len(&self) -> usize {
        self.actions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.read().await.is_empty()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the last write to storage failed
    pub fn is_persistence_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    async fn persist(&self, actions: &[QueuedAction]) {
        let result = match serde_json::to_string(actions) {
            Ok(serialized) => self.store.save(&self.key, &serialized).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("[QUEUE] Persistence recovered");
                }
            }
            Err(e) => {
                self.degraded.store(true, Ordering::SeqCst);
                tracing::warn!(
                    "[QUEUE] Failed to persist offline queue, continuing in memory: {}",
                    e
                );
            }
        }
    }

    fn notify(&self, pending: usize) {
        self.bus.publish(SyncEvent::QueueChanged { pending });
    }
}

async fn read_actions(store: &dyn KeyValueStore, key: &str) -> Vec<QueuedAction> {
    let raw = match store.load(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("[QUEUE] Cannot read persisted queue, starting empty: {}", e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<QueuedAction>>(&raw) {
        Ok(mut actions) => {
            actions.sort_by_key(|action| action.enqueued_at);
            actions
        }
        Err(e) => {
            tracing::warn!("[QUEUE] Persisted queue is corrupt, starting empty: {}", e);
            Vec::new()
        }
    }
}
