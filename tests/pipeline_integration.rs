//! End-to-end tests for the relay pipeline.
//!
//! Each test runs a mock RAG backend (mockito), the ingress + subscription
//! server on a random port and the router loop, then observes what gets
//! published over a real WebSocket subscription.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use chat_relay::config::AppConfig;
use chat_relay::context::AppContext;
use chat_relay::ingress::ingress_routes;
use chat_relay::publish::{PublishHub, subscribe_routes};
use chat_relay::rag::RagClient;
use chat_relay::registry::{Manifest, ProcessorRegistry, Processors};
use chat_relay::router::{Inbound, InboundSender, inbound_channel};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Relay {
    port: u16,
    ctx: AppContext,
    hub: Arc<PublishHub>,
    inbound: InboundSender,
    processors: Processors,
    router_task: Option<JoinHandle<()>>,
    _uploads: tempfile::TempDir,
}

impl Relay {
    /// Send the sentinel, wait for the router loop, then release processors.
    async fn stop(self) {
        if let Some(task) = self.router_task {
            self.inbound.send(Inbound::Shutdown).unwrap();
            task.await.unwrap();
        }
        self.ctx.router.drain_memory().await;
        self.processors.release_all().await;
    }
}

/// Manifest with only the dialogue processor.
const DIALOGUE_ONLY: &str = "modules:\n  base:\n    dialogue: { path: processors/dialogue }\n";

/// Start the relay against a RAG backend at `rag_url`.
async fn start_relay(rag_url: &str) -> Relay {
    start_relay_with(rag_url, DIALOGUE_ONLY).await
}

/// Start the relay with the processors named in `manifest`.
async fn start_relay_with(rag_url: &str, manifest: &str) -> Relay {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.rag.base_url = rag_url.to_string();
    config.rag.timeout_secs = 5;
    config.server.upload_dir = uploads.path().to_path_buf();

    let hub = PublishHub::new(config.publish.backlog_capacity);
    let rag = Arc::new(RagClient::new(&config.rag).unwrap());
    let ctx = AppContext::new(config, rag, hub.clone(), CancellationToken::new());

    let manifest = Manifest::parse(manifest, Path::new("registry.yaml")).unwrap();
    let processors = ProcessorRegistry::builtin().load(&manifest, &ctx);
    let (inbound, inbound_rx) = inbound_channel();
    let router_task = ctx.start_router(&processors, inbound_rx);

    let app = ingress_routes(inbound.clone(), uploads.path().to_path_buf())
        .merge(subscribe_routes(hub.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Relay {
        port,
        ctx,
        hub,
        inbound,
        processors,
        router_task,
        _uploads: uploads,
    }
}

/// Mock an empty backend that creates conversation `id` and answers chats.
async fn mock_backend(server: &mut ServerGuard, id: i64, message: &str) -> Vec<mockito::Mock> {
    let list = server
        .mock("GET", "/api/conversation/conversations")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let create = server
        .mock("POST", "/api/conversation")
        .match_body(Matcher::PartialJson(json!({"title": format!("User {id}")})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": id}).to_string())
        .expect(1)
        .create_async()
        .await;

    let chat = server
        .mock("POST", "/api/chat/conversation_chat")
        .match_body(Matcher::PartialJson(json!({
            "conversation_id": id,
            "message": message,
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"conversation_id": id, "reply": "hi there"}).to_string())
        .create_async()
        .await;

    vec![list, create, chat]
}

fn text_body(sender_id: i64, content: &str) -> Value {
    json!({
        "sender_id": sender_id,
        "sender": "susu",
        "chat_type": "private",
        "character": 1,
        "message_type": "text",
        "message_send_time": "2024-04-21 12:00:00",
        "content": content
    })
}

async fn post_text(port: u16, body: &Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/message/text"))
        .json(body)
        .send()
        .await
        .expect("ingress request failed")
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from relay"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    while !check().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

#[tokio::test]
async fn text_message_is_routed_and_published_to_sender_topic() {
    timeout(TEST_TIMEOUT, async {
        let mut backend = Server::new_async().await;
        let mocks = mock_backend(&mut backend, 1, "hello").await;
        let relay = start_relay(&backend.url()).await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{}/ws/42", relay.port))
            .await
            .expect("WS connect failed");
        // Subscription is registered once the upgrade completes.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = post_text(relay.port, &text_body(42, "hello")).await;
        assert_eq!(response.status(), 200);
        let ack: Value = response.json().await.unwrap();
        assert_eq!(ack["status"], "ok");

        let frame = ws.next().await.unwrap().unwrap();
        let published = parse_ws_json(&frame);
        assert_eq!(published, json!({"conversation_id": 1, "reply": "hi there"}));

        for mock in &mocks {
            mock.assert_async().await;
        }
        assert_eq!(relay.ctx.router.conversation_for(42).await, Some(1));
        relay.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_subscriber_gets_retained_result() {
    timeout(TEST_TIMEOUT, async {
        let mut backend = Server::new_async().await;
        let _mocks = mock_backend(&mut backend, 1, "are you there").await;
        let relay = start_relay(&backend.url()).await;

        let response = post_text(relay.port, &text_body(7, "are you there")).await;
        assert_eq!(response.status(), 200);

        let hub = Arc::clone(&relay.hub);
        wait_until(|| {
            let hub = Arc::clone(&hub);
            async move { hub.retained("7").await == 1 }
        })
        .await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{}/ws/7", relay.port))
            .await
            .expect("WS connect failed");
        let frame = ws.next().await.unwrap().unwrap();
        assert_eq!(parse_ws_json(&frame)["reply"], "hi there");

        // Acknowledged only after the frame went out.
        wait_until(|| {
            let hub = Arc::clone(&hub);
            async move { hub.retained("7").await == 0 }
        })
        .await;

        relay.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn backend_failure_publishes_nothing() {
    timeout(TEST_TIMEOUT, async {
        let mut backend = Server::new_async().await;
        let _list = backend
            .mock("GET", "/api/conversation/conversations")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("down for maintenance")
            .create_async()
            .await;
        let create = backend
            .mock("POST", "/api/conversation")
            .expect(0)
            .create_async()
            .await;
        let relay = start_relay(&backend.url()).await;

        let response = post_text(relay.port, &text_body(5, "hello")).await;
        // Ingress accepted it; the drop happens downstream.
        assert_eq!(response.status(), 200);

        // Drain: the sentinel is queued behind the message.
        let hub = Arc::clone(&relay.hub);
        let router = Arc::clone(&relay.ctx.router);
        relay.stop().await;

        assert_eq!(hub.retained("5").await, 0);
        assert_eq!(router.session_count().await, 0);
        create.assert_async().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_text_is_rejected_before_routing() {
    timeout(TEST_TIMEOUT, async {
        let mut backend = Server::new_async().await;
        let list = backend
            .mock("GET", "/api/conversation/conversations")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let relay = start_relay(&backend.url()).await;

        let mut body = text_body(1, "hello");
        body["chat_type"] = json!("broadcast");
        let response = post_text(relay.port, &body).await;
        assert_eq!(response.status(), 400);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["status"], "error");

        relay.stop().await;
        list.assert_async().await;
    })
    .await
    .expect("test timed out");
}

// ── Registry ─────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_manifest_drives_processors() {
    timeout(TEST_TIMEOUT, async {
        let mut backend = Server::new_async().await;
        let _mocks = mock_backend(&mut backend, 1, "through dialogue").await;
        let relay = start_relay(&backend.url()).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.yaml");
        std::fs::write(
            &path,
            r#"
modules:
  base:
    dialogue: { path: processors/dialogue }
  system:
    memory: { path: processors/memory, value: true }
  user:
    emotion: { path: processors/emotion, value: true }
"#,
        )
        .unwrap();

        let manifest = Manifest::load(&path).unwrap();
        let processors = ProcessorRegistry::builtin().load(&manifest, &relay.ctx);
        assert_eq!(processors.names(), ["dialogue", "memory"]);

        let memory = processors.get("memory").unwrap();
        let recall = memory.handle("ping").await.unwrap();
        assert!(recall["result"].as_str().unwrap().contains("ping"));

        let dialogue = processors.get("dialogue").unwrap();
        let reply = dialogue
            .handle(&text_body(9, "through dialogue").to_string())
            .await
            .unwrap();
        assert_eq!(reply["reply"], "hi there");
        assert_eq!(relay.hub.retained("9").await, 1);

        processors.release_all().await;
        assert!(memory.handle("after release").await.is_err());
        relay.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn relay_without_dialogue_refuses_messages() {
    timeout(TEST_TIMEOUT, async {
        let mut backend = Server::new_async().await;
        let list = backend
            .mock("GET", "/api/conversation/conversations")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let relay = start_relay_with(
            &backend.url(),
            "modules:\n  base: {}\n  system:\n    memory: { path: processors/memory, enabled: true }\n",
        )
        .await;
        assert_eq!(relay.processors.names(), ["memory"]);

        let response = post_text(relay.port, &text_body(3, "anyone home")).await;
        assert_eq!(response.status(), 503);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["status"], "error");

        relay.stop().await;
        list.assert_async().await;
    })
    .await
    .expect("test timed out");
}
