//! # Replay Metrics
//!
//! Cumulative counters for the queue processor.
//!
//! ## Features
//!
//! - **Run Tracking**: completed runs and runs skipped because another run
//!   was in flight or the client was offline
//! - **Outcome Totals**: actions synced and actions permanently dropped
//! - **Timing**: duration and wall-clock time of the last completed run

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayMetrics {
    pub runs: u64,
    pub skipped_runs: u64,
    pub total_synced: u64,
    pub total_failed: u64,
    pub last_run_duration: Option<Duration>,
    pub last_run_at: Option<DateTime<Utc>>,
    run_started: Option<Instant>,
}

impl ReplayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_start(&mut self) {
        self.run_started = Some(Instant::now());
    }

    pub fn record_run_end(&mut self, synced: usize, failed: usize) {
        self.runs += 1;
        self.total_synced += synced as u64;
        self.total_failed += failed as u64;
        self.last_run_duration = self.run_started.take().map(|start| start.elapsed());
        self.last_run_at = Some(Utc::now());
    }

    pub fn record_skipped(&mut self) {
        self.skipped_runs += 1;
    }

    /// Share of replayed actions that reached the server
    pub fn success_rate(&self) -> f64 {
        let total = self.total_synced + self.total_failed;
        if total == 0 {
            0.0
        } else {
            self.total_synced as f64 / total as f64
        }
    }
}
