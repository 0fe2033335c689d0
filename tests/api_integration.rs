use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use live_chat_feed::AppState;
use live_chat_feed::config::{AppConfig, FeedConfig, ServerConfig};
use live_chat_feed::feed::{FeedService, MemoryFeed, NewMessage};
use live_chat_feed::server::build_router;
use live_chat_feed::views::ViewStore;
use serde_json::{Value, json};

fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            title: "Test Chat".to_string(),
            request_timeout_secs: 30,
            view_idle_secs: 600,
        },
        feed: FeedConfig {
            message_limit: 10,
            page_delay_ms: 0,
            event_buffer: 64,
            seed_demo_messages: 0,
        },
    }
}

async fn server_with(count: i64) -> (TestServer, MemoryFeed, ViewStore) {
    let feed = MemoryFeed::new();
    for date in 1..=count {
        feed.create(NewMessage::new(format!("m{date}"), date))
            .await
            .unwrap();
    }
    let config = test_config();
    let views = ViewStore::new(Arc::new(feed.clone()), config.feed.view_settings());
    let state = AppState {
        views: views.clone(),
        config: Arc::new(config),
    };
    let server = TestServer::new(build_router(state).into_make_service()).unwrap();
    (server, feed, views)
}

async fn mount(server: &TestServer) -> (String, Value) {
    let response = server.post("/api/views").await;
    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    (body["view_id"].as_str().unwrap().to_string(), body)
}

#[tokio::test]
async fn test_index_serves_page_shell() {
    let (server, _, _) = server_with(0).await;

    let response = server.get("/").await;
    assert_eq!(response.status_code(), 200);
    let html = response.text();
    assert!(html.contains("<title>Test Chat</title>"));
    assert!(html.contains("EventSource"));
}

#[tokio::test]
async fn test_mount_returns_live_window() {
    let (server, _, views) = server_with(12).await;

    let (view_id, body) = mount(&server).await;
    assert_eq!(body["stream_url"], format!("/api/views/{view_id}/stream"));
    assert_eq!(body["display"]["live_len"], 10);
    assert_eq!(body["display"]["has_more"], true);
    assert_eq!(body["display"]["items"][0]["date"], 3);
    assert_eq!(body["display"]["items"][0]["provenance"], "live");
    assert_eq!(views.len(), 1);
}

#[tokio::test]
async fn test_older_page_and_html_fragment() {
    let (server, _, _) = server_with(12).await;
    let (view_id, _) = mount(&server).await;

    let response = server.post(&format!("/api/views/{view_id}/older")).await;
    assert_eq!(response.status_code(), 200);
    let outcome: Value = response.json();
    assert_eq!(outcome, json!({ "outcome": "fetched", "count": 2, "has_more": false }));

    let response = server.post(&format!("/api/views/{view_id}/older")).await;
    let outcome: Value = response.json();
    assert_eq!(outcome["outcome"], "exhausted");

    let html = server
        .get(&format!("/api/views/{view_id}/messages/html"))
        .await
        .text();
    assert!(html.contains(r#"data-has-more="false""#));
    assert_eq!(html.matches(r#"class="message history""#).count(), 2);
    assert_eq!(html.matches(r#"class="message live""#).count(), 10);
}

#[tokio::test]
async fn test_send_and_delete() {
    let (server, _, _) = server_with(3).await;
    let (view_id, _) = mount(&server).await;

    let response = server
        .post(&format!("/api/views/{view_id}/messages"))
        .json(&json!({ "text": "  " }))
        .await;
    let outcome: Value = response.json();
    assert_eq!(outcome["outcome"], "empty");

    let response = server
        .post(&format!("/api/views/{view_id}/messages"))
        .json(&json!({ "text": "hello" }))
        .await;
    let outcome: Value = response.json();
    assert_eq!(outcome["outcome"], "sent");
    let sent_id = outcome["id"].as_str().unwrap().to_string();

    let mut live_len = 0;
    for _ in 0..100 {
        let display: Value = server
            .get(&format!("/api/views/{view_id}/messages"))
            .await
            .json();
        live_len = display["live_len"].as_u64().unwrap();
        if live_len == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(live_len, 4);

    let response = server
        .delete(&format!("/api/views/{view_id}/messages/{sent_id}"))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["provenance"], "live");
}

#[tokio::test]
async fn test_unknown_view_is_not_found() {
    let (server, _, _) = server_with(0).await;

    let response = server.get("/api/views/missing/messages").await;
    assert_eq!(response.status_code(), 404);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_unmount_removes_view() {
    let (server, _, views) = server_with(1).await;
    let (view_id, _) = mount(&server).await;

    let response = server.delete(&format!("/api/views/{view_id}")).await;
    assert_eq!(response.status_code(), 204);
    assert!(views.is_empty());

    let response = server.delete(&format!("/api/views/{view_id}")).await;
    assert_eq!(response.status_code(), 404);
}
