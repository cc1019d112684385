//! Event-stream driver
//!
//! Keeps one Server-Sent Events connection open per channel. Every connect
//! starts from a full snapshot, so a reconnect converges even when change
//! events were lost while the stream was down.
//!
//! Reconnect loop: wait for connectivity, connect, consume frames until the
//! stream ends, back off, repeat. Consecutive attempts that never reach a
//! snapshot count towards the reconnect limit; a snapshot resets both the
//! counter and the backoff. A stream that stays silent for longer than
//! `stream_idle_timeout` counts as dropped.

use crate::client::api::FrameStream;
use crate::client::offline::retry::Backoff;
use crate::client::sync::channel::{Channel, DriverContext};
use crate::client::sync::network_monitor::wait_until_online;
use crate::client::sync::state::ChannelState;
use crate::shared::event::{SseFrame, StreamEvent};
use crate::shared::models::SyncItem;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// How one connection attempt ended
enum Attempt {
    /// The stream was live and then dropped
    Dropped,
    /// No snapshot was received
    Failed(String),
    /// The channel was closed underneath the driver
    Closed,
}

pub(crate) async fn run<T: SyncItem>(channel: Arc<Channel<T>>, ctx: DriverContext) {
    let mut backoff = Backoff::new(ctx.settings.backoff.clone());
    let mut connectivity = ctx.connectivity.watch();
    let mut failures: u32 = 0;

    loop {
        if channel.is_closed() {
            return;
        }
        if !*connectivity.borrow_and_update() {
            tracing::debug!("[STREAM] {} waiting for connectivity", channel.key());
            if !wait_until_online(&mut connectivity).await {
                return;
            }
        }
        if !channel.transition(ChannelState::Connecting) {
            return;
        }

        match attempt(&channel, &ctx, &mut backoff, &mut failures).await {
            Attempt::Closed => return,
            Attempt::Dropped => {
                if !channel.transition(ChannelState::Reconnecting) {
                    return;
                }
            }
            Attempt::Failed(error) => {
                failures += 1;
                let exhausted = ctx
                    .settings
                    .max_reconnect_attempts
                    .is_some_and(|max| failures >= max);
                if !channel.fail(error, exhausted) || exhausted {
                    return;
                }
                if !channel.transition(ChannelState::Reconnecting) {
                    return;
                }
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(
            "[STREAM] {} reconnecting in {:?} (attempt {})",
            channel.key(),
            delay,
            backoff.attempts()
        );
        tokio::time::sleep(delay).await;
    }
}

async fn attempt<T: SyncItem>(
    channel: &Channel<T>,
    ctx: &DriverContext,
    backoff: &mut Backoff,
    failures: &mut u32,
) -> Attempt {
    let stream = match ctx.api.open_stream(channel.key()).await {
        Ok(stream) => stream,
        Err(e) => return Attempt::Failed(e.to_string()),
    };
    if channel.is_closed() {
        return Attempt::Closed;
    }
    consume(channel, stream, ctx.settings.stream_idle_timeout, backoff, failures).await
}

/// Next frame, or an error once `idle` passes without one
async fn next_frame(stream: &mut FrameStream, idle: Duration) -> Option<Result<SseFrame, String>> {
    if idle.is_zero() {
        return stream.next().await.map(|frame| frame.map_err(|e| e.to_string()));
    }
    match tokio::time::timeout(idle, stream.next()).await {
        Ok(frame) => frame.map(|frame| frame.map_err(|e| e.to_string())),
        Err(_) => Some(Err(format!("no data for {:?}", idle))),
    }
}

async fn consume<T: SyncItem>(
    channel: &Channel<T>,
    mut stream: FrameStream,
    idle: Duration,
    backoff: &mut Backoff,
    failures: &mut u32,
) -> Attempt {
    let mut connected = false;

    let reason = loop {
        let frame = match next_frame(&mut stream, idle).await {
            Some(Ok(frame)) => frame,
            Some(Err(reason)) => break reason,
            None => break "stream ended".to_string(),
        };
        if channel.is_closed() {
            return Attempt::Closed;
        }

        let event = match StreamEvent::<T>::decode(&frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("[STREAM] {} dropped malformed event: {}", channel.key(), e);
                continue;
            }
        };

        match event {
            StreamEvent::Keepalive => {
                tracing::trace!("[STREAM] {} keepalive", channel.key());
            }
            StreamEvent::Snapshot(items) => {
                tracing::debug!("[STREAM] {} snapshot of {} item(s)", channel.key(), items.len());
                channel.replace(items);
                if !connected {
                    if !channel.transition(ChannelState::Connected) {
                        return Attempt::Closed;
                    }
                    connected = true;
                    backoff.reset();
                    *failures = 0;
                }
            }
            change => {
                channel.apply(change);
            }
        }
    };

    if channel.is_closed() {
        return Attempt::Closed;
    }
    if connected {
        tracing::warn!("[STREAM] {} connection dropped: {}", channel.key(), reason);
        Attempt::Dropped
    } else {
        Attempt::Failed(reason)
    }
}
