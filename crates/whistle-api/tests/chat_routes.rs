use anyhow::Context;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use whistle_core::registry::ChannelHandle;
use whistle_core::{AppConfig, AppState};
use whistle_models::gateway::ServerEvent;

struct TestContext {
    app: Router,
    state: AppState,
}

impl TestContext {
    async fn new() -> anyhow::Result<Self> {
        let db = whistle_db::create_pool("sqlite::memory:", 1).await?;
        whistle_db::run_migrations_for_engine(&db, whistle_db::DatabaseEngine::Sqlite).await?;

        let config = AppConfig::default();
        let state = AppState::new(db, config.clone());
        let app = whistle_api::build_router(&config).with_state(state.clone());
        Ok(Self { app, state })
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let builder = Request::builder().method(method).uri(path);
        let request = if let Some(payload) = body {
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))?
        } else {
            builder.body(Body::empty())?
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let body_bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let payload = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&body_bytes) }))
        };
        Ok((status, payload))
    }

    async fn send(&self, sender: &str, receiver: &str, content: &str) -> anyhow::Result<Value> {
        let (status, message) = self
            .request_json(
                Method::POST,
                "/chat/message",
                Some(json!({ "senderId": sender, "receiverId": receiver, "content": content })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED);
        Ok(message)
    }
}

#[tokio::test]
async fn health_reports_service_name() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (status, body) = ctx.request_json(Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "service": "whistle-chat" }));
    Ok(())
}

#[tokio::test]
async fn metrics_are_plain_text() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (status, body) = ctx.request_json(Method::GET, "/metrics", None).await?;
    assert_eq!(status, StatusCode::OK);
    let raw = body["raw"].as_str().context("metrics should not be json")?;
    assert!(raw.contains("whistle_up 1"));
    Ok(())
}

#[tokio::test]
async fn send_then_read_history_and_single_message() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let first = ctx.send("bob", "alice", "first").await?;
    ctx.send("alice", "bob", "second").await?;
    assert_eq!(first["conversationId"], "alice_bob");
    assert_eq!(first["isRead"], false);

    let (status, history) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = history
        .as_array()
        .context("history should be an array")?
        .iter()
        .map(|m| m["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(contents, ["first", "second"]);

    let message_id = first["messageId"].as_str().context("message id")?;
    let (status, fetched) = ctx
        .request_json(Method::GET, &format!("/chat/message/{message_id}"), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, first);
    Ok(())
}

#[tokio::test]
async fn history_limit_is_clamped() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    for i in 0..3 {
        ctx.send("alice", "bob", &format!("m{i}")).await?;
    }

    let (status, latest) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages?limit=0", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest.as_array().map(Vec::len), Some(1));
    assert_eq!(latest[0]["content"], "m2");

    let (status, all) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages?limit=100000", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().map(Vec::len), Some(3));

    let (status, _) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages?limit=lots", None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn missing_fields_are_bad_request() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (status, body) = ctx
        .request_json(
            Method::POST,
            "/chat/message",
            Some(json!({ "senderId": "alice", "content": "hi" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("receiverId"));

    let (status, _) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn padded_receiver_is_bad_request() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (status, body) = ctx
        .request_json(
            Method::POST,
            "/chat/message",
            Some(json!({ "senderId": "alice", "receiverId": " bob", "content": "hi" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .is_some_and(|m| m.contains("receiverId")));

    let (_, inbox) = ctx
        .request_json(Method::GET, "/chat/conversations/alice", None)
        .await?;
    assert_eq!(inbox, json!([]));
    Ok(())
}

#[tokio::test]
async fn unknown_message_is_not_found() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (status, body) = ctx
        .request_json(Method::GET, "/chat/message/does-not-exist", None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");
    Ok(())
}

#[tokio::test]
async fn conversations_list_latest_first() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.send("alice", "bob", "to bob").await?;
    ctx.send("carol", "alice", "from carol").await?;

    let (status, inbox) = ctx
        .request_json(Method::GET, "/chat/conversations/alice", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inbox.as_array().map(Vec::len), Some(2));
    assert_eq!(inbox[0]["conversationId"], "alice_carol");
    assert_eq!(inbox[0]["lastMessage"]["content"], "from carol");
    assert_eq!(inbox[1]["conversationId"], "alice_bob");

    let (status, empty) = ctx
        .request_json(Method::GET, "/chat/conversations/nobody", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty, json!([]));
    Ok(())
}

#[tokio::test]
async fn mark_read_is_idempotent() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.send("alice", "bob", "one").await?;
    ctx.send("alice", "bob", "two").await?;

    let (status, body) = ctx
        .request_json(Method::PUT, "/chat/alice_bob/read", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "conversationId": "alice_bob", "updated": 2 }));

    let (_, again) = ctx
        .request_json(Method::PUT, "/chat/alice_bob/read", None)
        .await?;
    assert_eq!(again["updated"], 0);

    let (_, history) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages", None)
        .await?;
    assert!(history
        .as_array()
        .context("history")?
        .iter()
        .all(|m| m["isRead"] == true));
    Ok(())
}

#[tokio::test]
async fn burn_removes_conversation_and_is_idempotent() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.send("alice", "carol", "keep").await?;
    for content in ["one", "two", "three"] {
        ctx.send("alice", "bob", content).await?;
    }

    let (status, body) = ctx
        .request_json(Method::DELETE, "/chat/alice_bob", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Conversation deleted");
    assert_eq!(body["deleted"], 3);

    let (_, history) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages", None)
        .await?;
    assert_eq!(history, json!([]));

    let (status, again) = ctx
        .request_json(Method::DELETE, "/chat/alice_bob", None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["deleted"], 0);

    let (_, other) = ctx
        .request_json(Method::GET, "/chat/alice_carol/messages", None)
        .await?;
    assert_eq!(other.as_array().map(Vec::len), Some(1));

    let fresh = ctx.send("bob", "alice", "after the burn").await?;
    let (_, history) = ctx
        .request_json(Method::GET, "/chat/alice_bob/messages", None)
        .await?;
    let history = history.as_array().context("history")?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["messageId"], fresh["messageId"]);
    assert_eq!(history[0]["content"], "after the burn");

    let (_, inbox) = ctx
        .request_json(Method::GET, "/chat/conversations/alice", None)
        .await?;
    let entry = inbox
        .as_array()
        .context("inbox")?
        .iter()
        .find(|c| c["conversationId"] == "alice_bob")
        .context("alice_bob summary")?;
    assert_eq!(entry["lastMessage"]["messageId"], fresh["messageId"]);
    assert_eq!(entry["lastMessage"]["isRead"], false);
    Ok(())
}

#[tokio::test]
async fn rest_send_pushes_to_connected_channels() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let (bob, mut bob_rx) = ChannelHandle::channel(8);
    let (alice, mut alice_rx) = ChannelHandle::channel(8);
    ctx.state.connections.register("bob", bob);
    ctx.state.connections.register("alice", alice);

    let stored = ctx.send("alice", "bob", "over http").await?;

    match bob_rx.try_recv() {
        Ok(ServerEvent::NewMessage(message)) => {
            assert_eq!(Some(message.message_id.as_str()), stored["messageId"].as_str());
        }
        other => panic!("expected new_message, got {other:?}"),
    }
    assert!(matches!(alice_rx.try_recv(), Ok(ServerEvent::MessageSent(_))));
    Ok(())
}

#[tokio::test]
async fn storage_outage_is_service_unavailable() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.state.db.close().await;
    let (status, body) = ctx
        .request_json(
            Method::POST,
            "/chat/message",
            Some(json!({ "senderId": "alice", "receiverId": "bob", "content": "hi" })),
        )
        .await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
    Ok(())
}
