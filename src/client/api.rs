//! Server API client
//!
//! `SyncApi` is the seam between the sync core and the network. The core
//! only needs four things from the server: a full collection fetch, a
//! Server-Sent Events stream per collection, and create/update/delete of a
//! single entity. `HttpApiClient` implements it over reqwest.

use crate::client::config::Config;
use crate::client::sync::state::ChannelKey;
use crate::shared::error::ApiError;
use crate::shared::event::{SseDecoder, SseFrame};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::Value;
use std::time::Duration;

/// Decoded SSE frames of one open stream; ends when the server closes it
pub type FrameStream = BoxStream<'static, Result<SseFrame, ApiError>>;

/// Outcome of a successful mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationResult {
    /// Id assigned or echoed by the server, when the response carried one
    pub id: Option<String>,
}

/// Calls the sync core makes against the server
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Fetch the whole collection for a channel, as raw JSON items
    async fn fetch_collection(&self, key: &ChannelKey) -> Result<Vec<Value>, ApiError>;

    /// Open the event stream for a channel
    async fn open_stream(&self, key: &ChannelKey) -> Result<FrameStream, ApiError>;

    async fn create(&self, collection: &str, body: &Value) -> Result<MutationResult, ApiError>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<MutationResult, ApiError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<MutationResult, ApiError>;
}

/// reqwest-backed API client
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    config: Config,
    client: Client,
    timeout: Duration,
}

impl HttpApiClient {
    pub fn new(config: Config) -> Self {
        let timeout = config.sync().fetch_timeout;
        Self {
            config,
            client: Client::new(),
            timeout,
        }
    }

    /// `{server}/api/{segments...}`
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(self.config.server_url())
            .map_err(|e| ApiError::Network(format!("Invalid server URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Network("Server URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.get_token() {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    fn require_token(&self) -> Result<&str, ApiError> {
        self.config.get_token().ok_or(ApiError::NotAuthenticated)
    }

    async fn send_mutation(&self, request: RequestBuilder) -> Result<MutationResult, ApiError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.require_token()?))
            .timeout(self.timeout)
            .send()
            .await?;
        let response = check_status(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(MutationResult::default());
        }
        let body: Value = serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(MutationResult {
            id: extract_id(&body),
        })
    }
}

#[async_trait]
impl SyncApi for HttpApiClient {
    async fn fetch_collection(&self, key: &ChannelKey) -> Result<Vec<Value>, ApiError> {
        let mut url = self.endpoint(&[&key.id])?;
        if let Some(filter) = &key.filter {
            url.query_pairs_mut().append_pair("status", filter);
        }

        tracing::debug!("[POLL] GET {}", url);
        let response = self
            .authorize(self.client.get(url))
            .timeout(self.timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: Value = response.json().await?;
        extract_items(body)
    }

    async fn open_stream(&self, key: &ChannelKey) -> Result<FrameStream, ApiError> {
        let mut url = self.endpoint(&[&key.id, "stream"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(filter) = &key.filter {
                query.append_pair("status", filter);
            }
            if let Some(token) = self.config.get_token() {
                query.append_pair("token", token);
            }
        }

        tracing::debug!("[STREAM] Opening stream for {}", key);
        // a request timeout would also cut the body, so only the handshake is bounded
        let request = self
            .client
            .get(url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ApiError::Timeout)??;
        let response = check_status(response).await?;

        let mut decoder = SseDecoder::new();
        let frames = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(ApiError::from(e))],
            })
            .flat_map(stream::iter);
        Ok(frames.boxed())
    }

    async fn create(&self, collection: &str, body: &Value) -> Result<MutationResult, ApiError> {
        let url = self.endpoint(&[collection])?;
        tracing::debug!("[REPLAY] POST {}", url);
        self.send_mutation(self.client.post(url).json(body)).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<MutationResult, ApiError> {
        let url = self.endpoint(&[collection, id])?;
        tracing::debug!("[REPLAY] PUT {}", url);
        self.send_mutation(self.client.put(url).json(body)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<MutationResult, ApiError> {
        let url = self.endpoint(&[collection, id])?;
        tracing::debug!("[REPLAY] DELETE {}", url);
        self.send_mutation(self.client.delete(url)).await
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Accept either a bare array or `{"items": [...]}`
fn extract_items(body: Value) -> Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ApiError::Decode(
                "expected an array or an object with an 'items' array".to_string(),
            )),
        },
        other => Err(ApiError::Decode(format!("unexpected collection body: {}", other))),
    }
}

/// `id` at the top level or under `item`, as a string or a number
fn extract_id(body: &Value) -> Option<String> {
    let id = body
        .get("id")
        .or_else(|| body.get("item").and_then(|item| item.get("id")))?;
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
