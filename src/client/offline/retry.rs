//! # Backoff Strategies
//!
//! Delay policies used between reconnect attempts of a channel.
//!
//! ## Features
//!
//! - **Fixed**: the same delay before every attempt
//! - **Exponential**: doubling delay, capped at a maximum
//! - **Reset**: a successful connection starts the sequence over
//!
//! ## Usage
//!
//! ```rust
//! use kinsync::client::offline::retry::{Backoff, BackoffStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = Backoff::new(BackoffStrategy::Exponential {
//!     base: Duration::from_secs(1),
//!     max: Duration::from_secs(4),
//! });
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(2));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(4));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(4));
//! ```

use crate::client::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        /// Delay before every attempt
        #[serde(rename = "delay_ms", with = "duration_ms")]
        delay: Duration,
    },
    /// Exponential backoff
    Exponential {
        /// Delay before the first retry
        #[serde(rename = "base_ms", with = "duration_ms")]
        base: Duration,
        /// Upper bound for any single delay
        #[serde(rename = "max_ms", with = "duration_ms")]
        max: Duration,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffStrategy {
    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { delay } => *delay,
            BackoffStrategy::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// Running backoff sequence for one connection
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: BackoffStrategy,
    attempt: u32,
}

impl Backoff {
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self { strategy, attempt: 0 }
    }

    /// Advance the sequence and return the delay to wait now
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.strategy.delay_for(self.attempt)
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
