//! Offline queue replay tests

use crate::common::*;
use assert_matches::assert_matches;
use kinsync::client::events::SyncEvent;
use kinsync::client::offline::{
    handler_fn, ActionKind, FileStore, KeyValueStore, MutationPayload, OfflineManager,
    OfflineQueue, ProcessOutcome, QueueProcessor, QueuedAction, ReplayHandlers,
};
use kinsync::client::config::{SyncSettings, QUEUE_STORAGE_KEY};
use kinsync::client::sync::NetworkMonitor;
use kinsync::client::SubmitOutcome;
use kinsync::shared::error::{ApiError, ReplayError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

fn ok_handler() -> Arc<dyn kinsync::client::offline::ReplayHandler> {
    handler_fn(|_| async { Ok::<Option<String>, ReplayError>(None) })
}

#[tokio::test]
async fn test_replay_scenario_with_one_transient_failure() {
    let (_store, queue, bus) = memory_queue(3).await;
    let network = Arc::new(NetworkMonitor::new(true));
    let processor = QueueProcessor::new(queue.clone(), network, bus);

    let a1 = queue.enqueue(ActionKind::Add, json!({"firstName": "Ada"})).await;
    let a2 = queue.enqueue(ActionKind::Edit, json!({"firstName": "Grace"})).await;

    let edit_attempts = Arc::new(AtomicUsize::new(0));
    let attempts = edit_attempts.clone();
    let handlers = ReplayHandlers::new().with(ActionKind::Add, ok_handler()).with(
        ActionKind::Edit,
        handler_fn(move |_| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ReplayError::Api(ApiError::Timeout))
                } else {
                    Ok(None)
                }
            }
        }),
    );

    let first = processor.process(&handlers).await;
    assert_eq!(first, ProcessOutcome { synced: 1, failed: 0 });
    let remaining = queue.peek_all().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, a2);
    assert_eq!(remaining[0].retry_count, 1);
    assert!(queue.get(&a1).await.is_none());

    let second = processor.process(&handlers).await;
    assert_eq!(second, ProcessOutcome { synced: 1, failed: 0 });
    assert!(queue.is_empty().await);

    let metrics = processor.metrics().await;
    assert_eq!(metrics.total_synced, 2);
    assert_eq!(metrics.total_failed, 0);
    assert_eq!(metrics.runs, 2);
}

#[tokio::test]
async fn test_action_is_dropped_after_three_failed_attempts() {
    let (_store, queue, bus) = memory_queue(3).await;
    let mut events = bus.subscribe();
    let network = Arc::new(NetworkMonitor::new(true));
    let processor = QueueProcessor::new(queue.clone(), network, bus);
    let id = queue.enqueue(ActionKind::Delete, json!({})).await;

    let handlers = ReplayHandlers::new().with(
        ActionKind::Delete,
        handler_fn(|_| async { Err::<Option<String>, ReplayError>(ReplayError::Handler("gone".into())) }),
    );

    assert_eq!(processor.process(&handlers).await, ProcessOutcome { synced: 0, failed: 0 });
    assert_eq!(processor.process(&handlers).await, ProcessOutcome { synced: 0, failed: 0 });
    assert_eq!(processor.process(&handlers).await, ProcessOutcome { synced: 0, failed: 1 });
    assert!(queue.is_empty().await);
    assert_eq!(processor.process(&handlers).await, ProcessOutcome { synced: 0, failed: 0 });

    let mut dropped = Vec::new();
    let mut processed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::ActionDropped { id, kind, .. } => dropped.push((id, kind)),
            SyncEvent::QueueProcessed { .. } => processed += 1,
            _ => {}
        }
    }
    assert_eq!(dropped, vec![(id, ActionKind::Delete)]);
    assert_eq!(processed, 4);
}

#[tokio::test]
async fn test_only_one_replay_run_at_a_time() {
    let (_store, queue, bus) = memory_queue(3).await;
    let network = Arc::new(NetworkMonitor::new(true));
    let processor = Arc::new(QueueProcessor::new(queue.clone(), network, bus));
    queue.enqueue(ActionKind::Add, json!({})).await;

    let gate = Arc::new(Notify::new());
    let release = gate.clone();
    let handlers = ReplayHandlers::new().with(
        ActionKind::Add,
        handler_fn(move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok::<Option<String>, ReplayError>(None)
            }
        }),
    );

    let first = {
        let processor = processor.clone();
        let handlers = handlers.clone();
        tokio::spawn(async move { processor.process(&handlers).await })
    };
    wait_until("first run to start", Duration::from_secs(5), || processor.is_running()).await;

    assert_eq!(processor.process(&handlers).await, ProcessOutcome::default());
    assert_eq!(processor.metrics().await.skipped_runs, 1);

    release.notify_one();
    let outcome = assert_ok!(first.await);
    assert_eq!(outcome, ProcessOutcome { synced: 1, failed: 0 });
    assert!(!processor.is_running());
}

#[tokio::test]
async fn test_replay_follows_enqueue_order() {
    let (_store, queue, bus) = memory_queue(3).await;
    let network = Arc::new(NetworkMonitor::new(true));
    let processor = QueueProcessor::new(queue.clone(), network, bus);

    let mut expected = Vec::new();
    for (n, kind) in [ActionKind::Add, ActionKind::Suggestion, ActionKind::Edit, ActionKind::Add]
        .into_iter()
        .enumerate()
    {
        expected.push(queue.enqueue(kind, json!({ "n": n })).await);
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let seen = seen.clone();
        handler_fn(move |action: QueuedAction| {
            seen.lock().unwrap().push(action.id);
            async { Ok::<Option<String>, ReplayError>(None) }
        })
    };
    let handlers = ReplayHandlers::new()
        .with(ActionKind::Add, recorder.clone())
        .with(ActionKind::Edit, recorder.clone())
        .with(ActionKind::Suggestion, recorder);

    assert_eq!(processor.process(&handlers).await.synced, 4);
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_api_handlers_map_kinds_to_calls() {
    let (_store, queue, bus) = memory_queue(3).await;
    let network = Arc::new(NetworkMonitor::new(true));
    let api = Arc::new(FakeApi::new());
    let processor = QueueProcessor::new(queue.clone(), network, bus);

    queue
        .enqueue(ActionKind::Add, MutationPayload::create("persons", json!({"firstName": "Ada"})).to_value())
        .await;
    queue
        .enqueue(ActionKind::Edit, MutationPayload::update("persons", "p-1", json!({"lastName": "L"})).to_value())
        .await;
    queue
        .enqueue(ActionKind::Delete, MutationPayload::delete("persons", "p-2").to_value())
        .await;
    queue
        .enqueue(ActionKind::Suggestion, MutationPayload::create("suggestions", json!({"type": "edit"})).to_value())
        .await;

    let outcome = processor.process(&ReplayHandlers::from_api(api.clone())).await;
    assert_eq!(outcome, ProcessOutcome { synced: 4, failed: 0 });

    let calls: Vec<(&str, String, Option<String>)> = api
        .mutations()
        .into_iter()
        .map(|call| (call.method, call.collection, call.id))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("POST", "persons".to_string(), None),
            ("PUT", "persons".to_string(), Some("p-1".to_string())),
            ("DELETE", "persons".to_string(), Some("p-2".to_string())),
            ("POST", "suggestions".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_queue_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let bus = kinsync::client::events::EventBus::default();

    let first = OfflineQueue::load(Arc::new(FileStore::new(dir.path())), bus.clone(), 3).await;
    let a1 = first.enqueue(ActionKind::Add, json!({"n": 1})).await;
    let a2 = first.enqueue(ActionKind::Edit, json!({"n": 2})).await;
    drop(first);

    let restored = OfflineQueue::load(Arc::new(FileStore::new(dir.path())), bus, 3).await;
    let order: Vec<String> = restored.peek_all().await.into_iter().map(|a| a.id).collect();
    assert_eq!(order, vec![a1, a2]);
}

#[tokio::test]
async fn test_corrupt_queue_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    assert_ok!(store.save(QUEUE_STORAGE_KEY, "[{\"id\": 3").await);

    let queue = OfflineQueue::load(store, kinsync::client::events::EventBus::default(), 3).await;
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_storage_failure_keeps_queue_working_in_memory() {
    let (store, queue, _bus) = memory_queue(3).await;
    store.set_fail_writes(true);

    let id = queue.enqueue(ActionKind::Add, json!({})).await;
    assert!(queue.is_persistence_degraded());
    assert_eq!(queue.peek_all().await[0].id, id);
}

#[tokio::test]
async fn test_submit_offline_then_replay_after_reconnect() {
    let (_store, queue, bus) = memory_queue(3).await;
    let network = Arc::new(NetworkMonitor::new(false));
    let api = Arc::new(FakeApi::new());
    let offline = OfflineManager::new(
        queue.clone(),
        network.clone(),
        ReplayHandlers::from_api(api.clone()),
        bus,
        SyncSettings::default(),
    );

    let payload = MutationPayload::create("persons", json!({"firstName": "Ada"}));
    let outcome = assert_ok!(offline.submit(ActionKind::Add, payload.to_value()).await);
    assert_matches!(outcome, SubmitOutcome::Queued { .. });
    assert!(api.mutations().is_empty());

    assert_eq!(offline.process_queue().await, ProcessOutcome::default());
    network.set_online(true);
    assert_eq!(offline.process_queue().await, ProcessOutcome { synced: 1, failed: 0 });
    assert_eq!(api.mutations().len(), 1);
    assert_eq!(offline.pending_count().await, 0);
}
