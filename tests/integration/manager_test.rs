//! Sync manager registry tests

use crate::common::*;
use kinsync::client::sync::{ChannelConfig, ChannelKey, ChannelState, PollInterval};
use kinsync::shared::error::SyncError;
use kinsync::shared::models::{Person, Suggestion};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_same_key_shares_one_transport() {
    let h = Harness::new(true);
    let key = ChannelConfig::family_tree().key;
    let first = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    let second = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));

    assert_ne!(first.id(), second.id());
    assert_eq!(h.manager.subscriber_count(&key), 2);
    assert_eq!(h.manager.channels(), vec![key.clone()]);

    eventually("stream to open", || h.api.open_count(&key) == 1).await;
    h.api.push(&key, snapshot_frame(json!([person_json("1", 1), person_json("2", 2)])));
    eventually("both views to fill", || {
        first.items().len() == 2 && second.items().len() == 2
    })
    .await;
    assert_eq!(*first.items(), *second.items());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.api.open_count(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn test_channel_closes_with_last_subscriber() {
    let h = Harness::new(true);
    let key = ChannelConfig::family_tree().key;
    let first = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    let second = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    let watcher = first.watch();

    eventually("stream to open", || h.api.open_count(&key) == 1).await;

    h.manager.unsubscribe(first);
    assert_eq!(h.manager.subscriber_count(&key), 1);
    assert_eq!(h.manager.status(&key), Some(second.state()));

    drop(second);
    assert_eq!(h.manager.status(&key), None);
    assert!(h.manager.channels().is_empty());
    assert_eq!(watcher.borrow().state, ChannelState::Closed);
    eventually("transport to be released", || h.api.stream_released(&key)).await;

    // a late frame lands nowhere
    h.api.push(&key, snapshot_frame(json!([person_json("1", 1)])));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(watcher.borrow().items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_after_close_opens_fresh_channel() {
    let h = Harness::new(true);
    let key = ChannelConfig::family_tree().key;
    let first = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    eventually("stream to open", || h.api.open_count(&key) == 1).await;
    drop(first);

    let again = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    eventually("stream to reopen", || h.api.open_count(&key) == 2).await;
    assert_ne!(again.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_same_key_with_other_item_type_is_rejected() {
    let h = Harness::new(false);
    let _tree = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    assert_err!(
        h.manager.subscribe::<Suggestion>(ChannelConfig::family_tree()),
        SyncError::TypeMismatch { .. }
    );
    assert_eq!(h.manager.subscriber_count(&ChannelConfig::family_tree().key), 1);
}

#[tokio::test]
async fn test_filters_make_distinct_channels() {
    let h = Harness::new(false);
    let _pending = assert_ok!(h.manager.subscribe::<Suggestion>(ChannelConfig::suggestions(Some("pending"))));
    let _all = assert_ok!(h.manager.subscribe::<Suggestion>(ChannelConfig::suggestions(None)));
    assert_eq!(h.manager.channels().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_aggregate_counts_follow_channels() {
    let h = Harness::new(true);
    let tree_key = ChannelConfig::family_tree().key;
    let pending_key = ChannelConfig::suggestions(Some("pending")).key;
    let unknown = ChannelKey::new("identity-claims");

    let mut counts = h
        .manager
        .aggregate_counts(&[tree_key.clone(), pending_key.clone(), unknown.clone()]);
    assert_eq!(counts.total(), 0);

    let _tree = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    let _pending = assert_ok!(h.manager.subscribe::<Suggestion>(ChannelConfig::suggestions(Some("pending"))));
    eventually("streams to open", || {
        h.api.open_count(&tree_key) == 1 && h.api.open_count(&pending_key) == 1
    })
    .await;

    h.api.push(&tree_key, snapshot_frame(json!([person_json("1", 1), person_json("2", 2)])));
    h.api.push(&pending_key, snapshot_frame(json!([{ "id": 7 }])));
    eventually("counts to settle", || counts.total() == 3).await;

    let current = counts.current();
    assert_eq!(current[&tree_key], 2);
    assert_eq!(current[&pending_key], 1);
    assert_eq!(current[&unknown], 0);

    h.api.push(&pending_key, change_frame("removed", json!({ "id": 7 })));
    let mut latest = counts.changed().await;
    while latest.as_ref().map(|c| c[&pending_key]) != Some(0) {
        latest = counts.changed().await;
    }
    assert_eq!(counts.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_offline_start_waits_for_network() {
    let h = Harness::new(false);
    let stream_key = ChannelConfig::family_tree().key;
    let poll_config = ChannelConfig::polling("persons", PollInterval::Every(Duration::from_secs(5)));
    let poll_key = poll_config.key.clone();
    let tree = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    let _listing = assert_ok!(h.manager.subscribe::<Person>(poll_config));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.api.open_count(&stream_key), 0);
    assert_eq!(h.api.fetch_count(&poll_key), 0);
    assert_eq!(tree.state(), ChannelState::Idle);

    h.network.set_online(true);
    eventually("stream to open", || h.api.open_count(&stream_key) == 1).await;
    eventually("first poll", || h.api.fetch_count(&poll_key) >= 1).await;
}

#[tokio::test]
async fn test_reconnect_unknown_channel_fails() {
    let h = Harness::new(true);
    assert_err!(
        h.manager.reconnect(&ChannelKey::new("nowhere")),
        SyncError::UnknownChannel(_)
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_everything() {
    let h = Harness::new(true);
    let key = ChannelConfig::family_tree().key;
    let mut tree = assert_ok!(h.manager.subscribe::<Person>(ChannelConfig::family_tree()));
    eventually("stream to open", || h.api.open_count(&key) == 1).await;

    h.manager.shutdown();
    assert!(h.manager.channels().is_empty());
    assert_eq!(tree.state(), ChannelState::Closed);
    assert_err!(tree.changed().await, SyncError::ChannelClosed(_));
    eventually("transport to be released", || h.api.stream_released(&key)).await;
}
