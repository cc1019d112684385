/**
 * Kinsync Client Entry Point
 *
 * Headless sync client: mirrors the family tree and pending suggestions,
 * replays queued edits and logs every sync event until Ctrl-C.
 */
use kinsync::client::events::{EventBus, SyncEvent};
use kinsync::client::offline::{FileStore, OfflineManager, OfflineQueue, ReplayHandlers};
use kinsync::client::sync::{ChannelConfig, NetworkMonitor, SyncManager};
use kinsync::client::{Config, HttpApiClient};
use kinsync::shared::models::{Person, Suggestion};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const PROBE_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = Config::from_env()?;
    tracing::info!("[STARTUP] Server {}", config.server_url());
    tracing::info!("[STARTUP] Data directory {}", config.data_dir().display());

    let bus = EventBus::new(config.sync().event_capacity);
    let api = Arc::new(HttpApiClient::new(config.clone()));
    let network = Arc::new(NetworkMonitor::new(config.start_online()).with_bus(bus.clone()));
    let _probe = network.spawn_probe(
        reqwest::Client::new(),
        config.server_url().to_string(),
        PROBE_INTERVAL,
    );

    let store = Arc::new(FileStore::new(config.data_dir()));
    let queue = Arc::new(
        OfflineQueue::load(store, bus.clone(), config.sync().max_replay_retries).await,
    );
    let offline = OfflineManager::new(
        queue,
        network.clone(),
        ReplayHandlers::from_api(api.clone()),
        bus.clone(),
        config.sync().clone(),
    );
    let _scheduler = offline.spawn_scheduler();

    let manager = SyncManager::new(api, network, config.sync().clone(), bus.clone());
    let mut events = manager.events();
    let _tree = manager.subscribe::<Person>(ChannelConfig::family_tree())?;
    let _suggestions = manager.subscribe::<Suggestion>(ChannelConfig::suggestions(Some("pending")))?;

    tracing::info!(
        "[STARTUP] Watching {} channel(s), {} queued action(s)",
        manager.channels().len(),
        offline.pending_count().await
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[SHUTDOWN] Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("[SYNC] Event log fell behind, {} event(s) skipped", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown();
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::ChannelStatus { key, state } => tracing::info!("[SYNC] {} is {}", key, state),
        SyncEvent::ChannelData { key, len, new_items } => {
            tracing::info!("[SYNC] {} has {} item(s), {} new", key, len, new_items)
        }
        SyncEvent::ChannelFailed { key, error } => {
            tracing::error!("[SYNC] {} stopped retrying: {}", key, error)
        }
        SyncEvent::QueueChanged { pending } => tracing::info!("[QUEUE] {} pending", pending),
        SyncEvent::QueueProcessed { synced, failed } => {
            tracing::info!("[REPLAY] {} synced, {} failed", synced, failed)
        }
        SyncEvent::ActionDropped { id, kind, error } => {
            tracing::error!("[REPLAY] Lost {} action {}: {}", kind, id, error)
        }
        SyncEvent::Connectivity { online } => tracing::info!("[NET] online={}", online),
    }
}
