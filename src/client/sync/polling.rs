//! Polling driver
//!
//! Fetches the whole collection once on start and then on a fixed interval.
//! A successful fetch replaces the collection wholesale. Failed fetches
//! keep the last good snapshot; a connected channel only drops to
//! `Reconnecting` once failures outnumber the configured threshold.

use crate::client::config::SyncSettings;
use crate::client::sync::channel::{Channel, DriverContext};
use crate::client::sync::state::{ChannelState, PollInterval};
use crate::shared::error::ApiError;
use crate::shared::models::SyncItem;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub(crate) fn resolve_interval(interval: PollInterval, settings: &SyncSettings) -> Duration {
    let period = match interval {
        PollInterval::Primary => settings.primary_poll_interval,
        PollInterval::Admin => settings.admin_poll_interval,
        PollInterval::Every(period) => period,
    };
    period.max(Duration::from_millis(1))
}

pub(crate) async fn run<T: SyncItem>(
    channel: Arc<Channel<T>>,
    ctx: DriverContext,
    interval: PollInterval,
) {
    let period = resolve_interval(interval, &ctx.settings);
    let threshold = ctx.settings.poll_failure_threshold;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    tracing::debug!("[POLL] {} polling every {:?}", channel.key(), period);

    loop {
        ticker.tick().await;
        if channel.is_closed() {
            return;
        }
        if !ctx.connectivity.is_online() {
            tracing::trace!("[POLL] {} offline, skipping fetch", channel.key());
            continue;
        }

        let state = channel.state();
        if matches!(state, ChannelState::Idle | ChannelState::Reconnecting)
            && !channel.transition(ChannelState::Connecting)
        {
            return;
        }

        match fetch::<T>(&channel, &ctx).await {
            Ok(items) => {
                if channel.is_closed() {
                    return;
                }
                channel.replace(items);
                failures = 0;
                if channel.state() == ChannelState::Connecting
                    && !channel.transition(ChannelState::Connected)
                {
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                match channel.state() {
                    ChannelState::Connecting => {
                        let exhausted = ctx
                            .settings
                            .max_reconnect_attempts
                            .is_some_and(|max| failures >= max);
                        if !channel.fail(e.to_string(), exhausted) || exhausted {
                            return;
                        }
                        channel.transition(ChannelState::Reconnecting);
                    }
                    ChannelState::Connected if failures > threshold => {
                        tracing::warn!(
                            "[POLL] {} failed {} times in a row: {}",
                            channel.key(),
                            failures,
                            e
                        );
                        channel.transition(ChannelState::Reconnecting);
                    }
                    ChannelState::Closed => return,
                    _ => {
                        tracing::warn!(
                            "[POLL] {} fetch failed ({}/{}), keeping last snapshot: {}",
                            channel.key(),
                            failures,
                            threshold,
                            e
                        );
                    }
                }
            }
        }
    }
}

async fn fetch<T: SyncItem>(channel: &Channel<T>, ctx: &DriverContext) -> Result<Vec<T>, ApiError> {
    let raw = tokio::time::timeout(ctx.settings.fetch_timeout, ctx.api.fetch_collection(channel.key()))
        .await
        .map_err(|_| ApiError::Timeout)??;

    let total = raw.len();
    let items: Vec<T> = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("[POLL] {} dropped malformed item: {}", channel.key(), e);
                None
            }
        })
        .collect();

    tracing::debug!("[POLL] {} fetched {}/{} item(s)", channel.key(), items.len(), total);
    Ok(items)
}
