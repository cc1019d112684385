//! Shared Error Types
//!
//! Error types used across the sync core. Each enum covers one failure
//! category of the client:
//!
//! - `SharedError` - wire payload decoding and validation failures
//! - `ApiError` - transport and HTTP failures from the API client
//! - `StorageError` - key-value persistence failures (offline queue)
//! - `ReplayError` - a queued mutation could not be replayed
//! - `SyncError` - subscription-level failures surfaced by the sync manager
//!
//! # Usage
//!
//! ```rust
//! use kinsync::shared::error::{ApiError, SharedError};
//!
//! let error = SharedError::validation("event", "unknown event type 'foo'");
//! assert!(error.to_string().contains("event"));
//!
//! assert!(ApiError::Status { status: 503, body: String::new() }.is_retryable());
//! assert!(!ApiError::Status { status: 404, body: String::new() }.is_retryable());
//! ```
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync` and `Clone`, so they can be stored in
//! channel views and broadcast to several observers.
use thiserror::Error;

/// Wire-boundary error: a payload could not be decoded or validated
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

/// Failure reported by the API client collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never reached the server or the connection broke
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// The request exceeded its time budget
    #[error("Request timed out")]
    Timeout,

    /// The response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// No credentials are available for an authenticated call
    #[error("Not authenticated")]
    NotAuthenticated,
}

impl ApiError {
    /// Whether the same call may succeed later without changes.
    ///
    /// Network failures, timeouts, 5xx and 429 responses are transient;
    /// everything else (4xx, decode errors, missing credentials) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Decode(_) | ApiError::NotAuthenticated => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Failure of the key-value store backing the offline queue
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Filesystem or platform storage failure
    #[error("Storage I/O error: {0}")]
    Io(String),

    /// The stored value could not be (de)serialized
    #[error("Storage serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Failure while replaying a queued mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// The direct API call failed
    #[error("API call failed: {0}")]
    Api(#[from] ApiError),

    /// The payload does not match what the handler expects
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// No handler is registered for the action kind
    #[error("No handler registered for '{0}' actions")]
    MissingHandler(String),

    /// The handler reported a failure of its own
    #[error("Handler failed: {0}")]
    Handler(String),

    /// The handler panicked while replaying
    #[error("Handler panicked")]
    Panicked,
}

impl ReplayError {
    /// Whether a direct submission that failed this way should be queued
    /// for a later replay instead of being reported to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplayError::Api(err) => err.is_retryable(),
            ReplayError::Handler(_) | ReplayError::Panicked => true,
            ReplayError::InvalidPayload(_) | ReplayError::MissingHandler(_) => false,
        }
    }
}

/// Subscription-level failure surfaced by the sync manager
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A channel with the same key already exists for a different item type
    #[error("Channel '{key}' is already registered with another item type")]
    TypeMismatch {
        /// Display form of the channel key
        key: String,
    },

    /// The channel has been closed and will not deliver further updates
    #[error("Channel '{0}' is closed")]
    ChannelClosed(String),

    /// The channel is not registered
    #[error("Channel '{0}' is not subscribed")]
    UnknownChannel(String),
}
