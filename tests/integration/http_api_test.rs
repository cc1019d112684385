//! HTTP API client tests against a mock server

use futures_util::StreamExt;
use kinsync::client::api::{HttpApiClient, SyncApi};
use kinsync::client::sync::ChannelKey;
use kinsync::client::Config;
use kinsync::shared::config::AppConfig;
use kinsync::shared::error::ApiError;
use kinsync::shared::event::{SseFrame, StreamEvent};
use kinsync::shared::models::Person;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, token: Option<&str>) -> HttpApiClient {
    let mut builder = AppConfig::builder().server_url(server.uri());
    if let Some(token) = token {
        builder = builder.token(token);
    }
    HttpApiClient::new(assert_ok!(Config::with_builder(builder)))
}

#[tokio::test]
async fn test_fetch_collection_sends_filter_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/suggestions"))
        .and(query_param("status", "pending"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": 1 }, { "id": 2 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server, Some("secret"));
    let items = assert_ok!(
        api.fetch_collection(&ChannelKey::new("suggestions").with_filter("pending"))
            .await
    );
    assert_eq!(items, vec![json!({ "id": 1 }), json!({ "id": 2 })]);
}

#[tokio::test]
async fn test_fetch_collection_accepts_bare_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/family-tree"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "a" }])))
        .mount(&server)
        .await;

    let api = client(&server, None);
    let items = assert_ok!(api.fetch_collection(&ChannelKey::new("family-tree")).await);
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_server_errors_map_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/family-tree"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let api = client(&server, None);
    let error = api
        .fetch_collection(&ChannelKey::new("family-tree"))
        .await
        .unwrap_err();
    assert_eq!(
        error,
        ApiError::Status {
            status: 503,
            body: "maintenance".to_string()
        }
    );
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_unexpected_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/family-tree"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "people": [] })))
        .mount(&server)
        .await;

    let api = client(&server, None);
    assert_err!(
        api.fetch_collection(&ChannelKey::new("family-tree")).await,
        ApiError::Decode(_)
    );
}

#[tokio::test]
async fn test_stream_decodes_frames() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: snapshot\n",
        "data: {\"items\": [{\"id\": 1}]}\n",
        "\n",
        ": ping\n",
        "\n",
        "data: {\"type\": \"added\", \"item\": {\"id\": 2}}\n",
        "\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/family-tree/stream"))
        .and(query_param("token", "secret"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let api = client(&server, Some("secret"));
    let stream = assert_ok!(api.open_stream(&ChannelKey::new("family-tree")).await);
    let frames: Vec<SseFrame> = stream.map(|frame| assert_ok!(frame)).collect().await;
    assert_eq!(frames.len(), 2);

    match assert_ok!(StreamEvent::<Person>::decode(&frames[0])) {
        StreamEvent::Snapshot(items) => assert_eq!(items[0].id, "1"),
        other => panic!("expected snapshot, got {:?}", other),
    }
    match assert_ok!(StreamEvent::<Person>::decode(&frames[1])) {
        StreamEvent::Added(person) => assert_eq!(person.id, "2"),
        other => panic!("expected added, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_rejected_by_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/family-tree/stream"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let api = client(&server, None);
    match api.open_stream(&ChannelKey::new("family-tree")).await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 401),
        Err(other) => panic!("expected status error, got {:?}", other),
        Ok(_) => panic!("expected status error, got a stream"),
    }
}

#[tokio::test]
async fn test_create_returns_server_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/persons"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_json(json!({ "firstName": "Ada" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "item": { "id": 42 } })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server, Some("secret"));
    let result = assert_ok!(api.create("persons", &json!({ "firstName": "Ada" })).await);
    assert_eq!(result.id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_update_and_delete_target_the_entity() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/persons/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/persons/p-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server, Some("secret"));
    let updated = assert_ok!(api.update("persons", "p-1", &json!({ "lastName": "L" })).await);
    assert_eq!(updated.id.as_deref(), Some("p-1"));

    let deleted = assert_ok!(api.delete("persons", "p-1").await);
    assert_eq!(deleted.id, None);
}

#[tokio::test]
async fn test_mutations_require_a_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let api = client(&server, None);
    assert_err!(
        api.create("persons", &json!({})).await,
        ApiError::NotAuthenticated
    );
}

#[tokio::test]
async fn test_client_errors_are_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/persons/p-9"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid birth date"))
        .mount(&server)
        .await;

    let api = client(&server, Some("secret"));
    let error = api
        .update("persons", "p-9", &json!({ "birthDate": "soon" }))
        .await
        .unwrap_err();
    assert!(matches!(error, ApiError::Status { status: 422, .. }));
    assert!(!error.is_retryable());
}
