//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - A scripted `SyncApi` fake
//! - Fixtures for records, queues and managers
//! - Custom assertion macros and async wait helpers

#[macro_use]
pub mod assertions;

// Re-export commonly used utilities
pub use assertions::*;
pub use fake_api::*;
pub use fixtures::*;
