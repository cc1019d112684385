//! Polling channel tests

use crate::common::*;
use kinsync::client::config::SyncSettings;
use kinsync::client::sync::{ChannelConfig, ChannelState, PollInterval};
use kinsync::shared::models::{PermissionRequest, Person};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

fn listing() -> ChannelConfig {
    ChannelConfig::family_tree_listing()
}

#[tokio::test(start_paused = true)]
async fn test_fetches_immediately_then_on_interval() {
    let h = Harness::new(true);
    let key = listing().key;
    h.api.set_collection(&key, vec![person_json("1", 1)]);
    let people = assert_ok!(h.manager.subscribe::<Person>(listing()));

    eventually("first fetch", || people.state() == ChannelState::Connected).await;
    assert_eq!(h.api.fetch_count(&key), 1);
    assert_eq!(ids(people.items().as_slice()), vec!["1"]);

    h.api.set_collection(&key, vec![person_json("1", 1), person_json("2", 2)]);
    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(h.api.fetch_count(&key), 1);

    eventually("second fetch", || people.items().len() == 2).await;
    assert_eq!(h.api.fetch_count(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_lists_normalize_to_empty() {
    let h = Harness::new(true);
    let key = listing().key;
    h.api.set_collection(
        &key,
        vec![
            json!({ "id": 1, "children": null }),
            json!({ "id": "2", "parents": [1, "3", 1] }),
            json!({ "firstName": "no id" }),
        ],
    );
    let people = assert_ok!(h.manager.subscribe::<Person>(listing()));
    eventually("first fetch", || people.state() == ChannelState::Connected).await;

    let items = people.items();
    assert_eq!(items.len(), 2);
    let one = items.iter().find(|p| p.id == "1").unwrap();
    assert!(one.children.is_empty());
    assert!(one.parents.is_empty());
    let two = items.iter().find(|p| p.id == "2").unwrap();
    assert_eq!(two.parents, vec!["1", "3"]);
}

#[tokio::test(start_paused = true)]
async fn test_failures_tolerated_up_to_threshold() {
    let h = Harness::new(true);
    let key = listing().key;
    h.api.set_collection(&key, vec![person_json("1", 1)]);
    let people = assert_ok!(h.manager.subscribe::<Person>(listing()));
    eventually("first fetch", || people.state() == ChannelState::Connected).await;

    h.api.fail_fetches(&key, 4);
    eventually("three failed polls", || h.api.fetch_count(&key) == 4).await;
    assert_eq!(people.state(), ChannelState::Connected);
    assert_eq!(people.items().len(), 1);

    eventually("fourth failed poll", || people.state() == ChannelState::Reconnecting).await;
    assert_eq!(h.api.fetch_count(&key), 5);
    assert_eq!(people.items().len(), 1);

    eventually("recovery", || people.state() == ChannelState::Connected).await;
    assert_eq!(h.api.fetch_count(&key), 6);
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_failure_retries() {
    let h = Harness::new(true);
    let key = listing().key;
    h.api.fail_fetches(&key, 1);
    h.api.set_collection(&key, vec![person_json("1", 1)]);
    let people = assert_ok!(h.manager.subscribe::<Person>(listing()));

    eventually("error after failed first fetch", || people.snapshot().last_error.is_some()).await;
    assert!(people.items().is_empty());
    assert!(!people.snapshot().terminal);

    eventually("second fetch", || people.state() == ChannelState::Connected).await;
    assert_eq!(people.items().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_admin_listing_uses_slow_interval() {
    let h = Harness::new(true);
    let config = ChannelConfig::permission_requests(Some("pending"));
    let key = config.key.clone();
    h.api.set_collection(&key, vec![json!({ "id": 1, "requestedRole": "editor" })]);
    let requests = assert_ok!(h.manager.subscribe::<PermissionRequest>(config));

    eventually("first fetch", || requests.state() == ChannelState::Connected).await;
    assert_eq!(requests.items()[0].status, "pending");

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(h.api.fetch_count(&key), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.api.fetch_count(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn test_intervals_come_from_settings() {
    let settings = SyncSettings {
        primary_poll_interval: Duration::from_secs(1),
        ..SyncSettings::default()
    };
    let h = Harness::with_settings(true, settings);
    let config = ChannelConfig::polling("persons", PollInterval::Primary);
    let key = config.key.clone();
    let _people = assert_ok!(h.manager.subscribe::<Person>(config));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(h.api.fetch_count(&key), 4);
}
