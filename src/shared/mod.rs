//! Shared Module
//!
//! Types that are independent of the client runtime: the domain records the
//! client mirrors, the server push wire protocol, error types and base
//! configuration.

/// Family tree records and the `SyncItem` trait
pub mod models;

/// Server push event protocol
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use models::{IdentityClaim, PermissionRequest, Person, Suggestion, SyncItem};
pub use event::{SseDecoder, SseFrame, StreamEvent};
pub use error::{ApiError, ReplayError, SharedError, StorageError, SyncError};
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
