//! # Channel State
//!
//! Identity, configuration and observable state of a synchronization
//! channel.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──subscribe──▶ Connecting ──data──▶ Connected
//!                        │  ▲                 │
//!                failure │  │ backoff    drop │
//!                        ▼  │                 ▼
//!                      Error ──────────▶ Reconnecting
//!
//! any ──last unsubscribe──▶ Closed
//! ```
//!
//! `Error` is terminal only once reconnect attempts are exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identity of a channel: collection id plus optional server-side filter.
///
/// Two subscriptions with equal keys share one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub id: String,
    pub filter: Option<String>,
}

impl ChannelKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}[{}]", self.id, filter),
            None => write!(f, "{}", self.id),
        }
    }
}

/// How often a polling channel refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    /// Interval for primary data (`SyncSettings::primary_poll_interval`)
    Primary,
    /// Interval for administrative listings (`SyncSettings::admin_poll_interval`)
    Admin,
    /// Explicit interval
    Every(Duration),
}

/// Transport a channel uses.
///
/// Non-exhaustive so a socket-based strategy can be added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StrategyKind {
    /// Periodic full-collection fetch
    Polling { interval: PollInterval },
    /// Server-Sent Events: snapshot followed by incremental changes
    EventStream,
}

/// What a consumer asks the sync manager for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub key: ChannelKey,
    pub strategy: StrategyKind,
}

impl ChannelConfig {
    pub fn event_stream(id: impl Into<String>) -> Self {
        Self {
            key: ChannelKey::new(id),
            strategy: StrategyKind::EventStream,
        }
    }

    pub fn polling(id: impl Into<String>, interval: PollInterval) -> Self {
        Self {
            key: ChannelKey::new(id),
            strategy: StrategyKind::Polling { interval },
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.key = self.key.with_filter(filter);
        self
    }

    /// Live family tree
    pub fn family_tree() -> Self {
        Self::event_stream("family-tree")
    }

    /// Bulk family tree listing refreshed by polling
    pub fn family_tree_listing() -> Self {
        Self::polling("family-tree", PollInterval::Primary).with_filter("all")
    }

    /// Suggestions, optionally restricted to one status
    pub fn suggestions(status: Option<&str>) -> Self {
        let config = Self::event_stream("suggestions");
        match status {
            Some(status) => config.with_filter(status),
            None => config,
        }
    }

    /// Permission requests (administrative listing)
    pub fn permission_requests(status: Option<&str>) -> Self {
        let config = Self::polling("permission-requests", PollInterval::Admin);
        match status {
            Some(status) => config.with_filter(status),
            None => config,
        }
    }

    /// Identity claims (administrative listing)
    pub fn identity_claims(status: Option<&str>) -> Self {
        let config = Self::polling("identity-claims", PollInterval::Admin);
        match status {
            Some(status) => config.with_filter(status),
            None => config,
        }
    }
}

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Closed,
}

impl ChannelState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting)
            | (Connecting, Connected)
            | (Connecting, Error)
            | (Connected, Reconnecting)
            | (Reconnecting, Connecting)
            | (Error, Reconnecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Error => "error",
            ChannelState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Everything a subscriber can observe about a channel
#[derive(Debug, Clone)]
pub struct ChannelView<T> {
    pub state: ChannelState,
    /// Last good snapshot, kept while reconnecting
    pub items: Arc<Vec<T>>,
    /// Items added since the consumer last cleared the badge
    pub new_items: usize,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Set once reconnect attempts are exhausted
    pub terminal: bool,
}

impl<T> ChannelView<T> {
    pub fn idle() -> Self {
        Self {
            state: ChannelState::Idle,
            items: Arc::new(Vec::new()),
            new_items: 0,
            last_error: None,
            last_synced_at: None,
            terminal: false,
        }
    }
}
