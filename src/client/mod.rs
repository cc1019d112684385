//! # Client Sync Core
//!
//! Runtime half of the crate: everything that talks to the server and keeps
//! local state current.
//!
//! ## Key Components
//!
//! - `api.rs`: `SyncApi` seam and its reqwest implementation
//! - `config.rs`: client configuration and sync tuning
//! - `events.rs`: broadcast bus for status, data and queue events
//! - `offline/`: durable mutation queue and replay
//! - `sync/`: channel registry, drivers and reconciliation

pub mod api;
pub mod config;
pub mod events;
pub mod offline;
pub mod sync;

pub use api::{HttpApiClient, MutationResult, SyncApi};
pub use config::{Config, SyncSettings};
pub use events::{EventBus, SyncEvent};
pub use offline::{OfflineManager, SubmitOutcome};
pub use sync::{Subscription, SyncManager};
