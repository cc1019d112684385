//! Kinsync - Family Tree Sync Core
//!
//! Kinsync keeps a client's local replica of a shared family tree current.
//! Remote collections (the tree, suggestions, permission requests and
//! identity claims) are mirrored through polling or a Server-Sent Events
//! stream, and local edits made while disconnected are queued durably and
//! replayed once connectivity returns.
//!
//! # Module Structure
//!
//! - **`shared`** - Wire-level types
//!   - Domain records and the `SyncItem` trait
//!   - SSE framing and decoded stream events
//!   - Error types and base configuration
//!
//! - **`client`** - Runtime
//!   - Channel registry with event-stream and polling drivers
//!   - Offline queue, replay handlers, processor and scheduler
//!   - reqwest API client and connectivity monitor
//!
//! # Usage
//!
//! ```rust,no_run
//! use kinsync::client::events::EventBus;
//! use kinsync::client::offline::{FileStore, OfflineManager, OfflineQueue, ReplayHandlers};
//! use kinsync::client::sync::{ChannelConfig, NetworkMonitor, SyncManager};
//! use kinsync::client::{Config, HttpApiClient};
//! use kinsync::shared::models::Person;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let bus = EventBus::new(config.sync().event_capacity);
//! let api = Arc::new(HttpApiClient::new(config.clone()));
//! let network = Arc::new(NetworkMonitor::new(config.start_online()).with_bus(bus.clone()));
//!
//! let store = Arc::new(FileStore::new(config.data_dir()));
//! let queue = Arc::new(OfflineQueue::load(store, bus.clone(), config.sync().max_replay_retries).await);
//! let offline = OfflineManager::new(
//!     queue,
//!     network.clone(),
//!     ReplayHandlers::from_api(api.clone()),
//!     bus.clone(),
//!     config.sync().clone(),
//! );
//! let _scheduler = offline.spawn_scheduler();
//!
//! let manager = SyncManager::new(api, network, config.sync().clone(), bus);
//! let tree = manager.subscribe::<Person>(ChannelConfig::family_tree())?;
//! println!("{} people", tree.items().len());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! - Transport errors drive reconnect/backoff and surface as channel state
//! - Replay errors are retried up to a bound, then reported as dropped
//! - Malformed payloads are logged and skipped
//! - Storage errors degrade the queue to in-memory operation

/// Wire types, records, errors and base configuration
pub mod shared;

/// Sync runtime
pub mod client;
