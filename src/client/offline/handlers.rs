//! # Replay Handlers
//!
//! Per-kind executors for queued actions. The queue processor looks a
//! handler up by `ActionKind`; an action without a handler can never be
//! replayed and is dropped.

use crate::client::api::SyncApi;
use crate::client::offline::queue::{ActionKind, QueuedAction};
use crate::shared::error::ReplayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Executes one queued action against the server
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    /// Returns the server-assigned id when the server reports one
    async fn replay(&self, action: &QueuedAction) -> Result<Option<String>, ReplayError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ReplayHandler for FnHandler<F>
where
    F: Fn(QueuedAction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<String>, ReplayError>> + Send + 'static,
{
    async fn replay(&self, action: &QueuedAction) -> Result<Option<String>, ReplayError> {
        (self.0)(action.clone()).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ReplayHandler>
where
    F: Fn(QueuedAction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, ReplayError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handler registry keyed by action kind
#[derive(Clone, Default)]
pub struct ReplayHandlers {
    handlers: HashMap<ActionKind, Arc<dyn ReplayHandler>>,
}

impl ReplayHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kind replayed through the server API
    pub fn from_api(api: Arc<dyn SyncApi>) -> Self {
        let handler: Arc<dyn ReplayHandler> = Arc::new(ApiReplayHandler::new(api));
        [
            ActionKind::Add,
            ActionKind::Edit,
            ActionKind::Delete,
            ActionKind::Suggestion,
        ]
        .into_iter()
        .fold(Self::new(), |handlers, kind| handlers.with(kind, handler.clone()))
    }

    pub fn with(mut self, kind: ActionKind, handler: Arc<dyn ReplayHandler>) -> Self {
        self.insert(kind, handler);
        self
    }

    pub fn insert(&mut self, kind: ActionKind, handler: Arc<dyn ReplayHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ReplayHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

impl fmt::Debug for ReplayHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.handlers.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("ReplayHandlers").field("kinds", &kinds).finish()
    }
}

/// Payload shape understood by [`ApiReplayHandler`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationPayload {
    /// Collection path segment, e.g. `persons` or `suggestions`
    pub collection: String,
    /// Target entity; required for edits and deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl MutationPayload {
    pub fn create(collection: impl Into<String>, body: Value) -> Self {
        Self {
            collection: collection.into(),
            entity_id: None,
            body,
        }
    }

    pub fn update(collection: impl Into<String>, entity_id: impl Into<String>, body: Value) -> Self {
        Self {
            collection: collection.into(),
            entity_id: Some(entity_id.into()),
            body,
        }
    }

    pub fn delete(collection: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entity_id: Some(entity_id.into()),
            body: Value::Null,
        }
    }

    fn target(&self, kind: ActionKind) -> Result<&str, ReplayError> {
        self.entity_id.as_deref().ok_or_else(|| {
            ReplayError::InvalidPayload(format!("{} action without an entity id", kind))
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Maps queued mutations onto create/update/delete API calls
pub struct ApiReplayHandler {
    api: Arc<dyn SyncApi>,
}

impl ApiReplayHandler {
    pub fn new(api: Arc<dyn SyncApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ReplayHandler for ApiReplayHandler {
    async fn replay(&self, action: &QueuedAction) -> Result<Option<String>, ReplayError> {
        let payload: MutationPayload = serde_json::from_value(action.payload.clone())
            .map_err(|e| ReplayError::InvalidPayload(e.to_string()))?;

        let result = match action.kind {
            ActionKind::Add | ActionKind::Suggestion => {
                self.api.create(&payload.collection, &payload.body).await?
            }
            ActionKind::Edit => {
                self.api
                    .update(&payload.collection, payload.target(action.kind)?, &payload.body)
                    .await?
            }
            ActionKind::Delete => {
                self.api
                    .delete(&payload.collection, payload.target(action.kind)?)
                    .await?
            }
        };

        Ok(result.id.or_else(|| payload.entity_id.clone()))
    }
}
