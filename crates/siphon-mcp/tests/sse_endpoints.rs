//! End-to-end tests against the real router on a local port

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use siphon_core::{UnlockerClient, standard_registry};
use siphon_mcp::transport::StreamOptions;
use siphon_mcp::{
    AppState, BillingGate, HandshakeState, HttpBillingGate, McpServer, SessionStore, StreamAuth,
    router,
};
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "test-token";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Unlocker stand-in that answers with the URL it was asked to fetch
async fn unlocker_stub() -> String {
    let app = Router::new().route(
        "/request",
        post(|Json(body): Json<Value>| async move {
            format!("fetched {}", body["url"].as_str().unwrap_or_default())
        }),
    );
    format!("{}/request", serve(app).await)
}

/// Billing stand-in that accepts the stream check and refuses everything else
async fn refusing_billing_stub() -> String {
    let app = Router::new().route(
        "/charge",
        post(|Json(body): Json<Value>| async move {
            if body["tool_name"] == "mcp-auth-check" {
                (StatusCode::OK, Json(json!({"ok": true})))
            } else {
                (
                    StatusCode::PAYMENT_REQUIRED,
                    Json(json!({"message": "Insufficient credits"})),
                )
            }
        }),
    );
    format!("{}/charge", serve(app).await)
}

struct Harness {
    base: String,
    sessions: Arc<SessionStore>,
    http: reqwest::Client,
}

async fn start(billing_url: Option<String>) -> Harness {
    let unlocker = UnlockerClient::new(Some("api-token".into()), "mcp_unlocker")
        .unwrap()
        .with_endpoint(unlocker_stub().await);
    let registry = Arc::new(standard_registry(Arc::new(unlocker)).unwrap());

    let mut server = McpServer::new(registry);
    let auth = match billing_url {
        Some(url) => {
            let gate: Arc<dyn BillingGate> = Arc::new(HttpBillingGate::new(url).unwrap());
            server = server.with_billing(gate.clone());
            StreamAuth::Metered(gate)
        }
        None => StreamAuth::Token(TOKEN.to_string()),
    };

    let sessions = Arc::new(SessionStore::new());
    let state = AppState {
        server: Arc::new(server),
        sessions: sessions.clone(),
        auth: Arc::new(auth),
        stream: StreamOptions {
            heartbeat: Duration::from_millis(50),
            ..StreamOptions::default()
        },
    };

    Harness {
        base: serve(router(state)).await,
        sessions,
        http: reqwest::Client::new(),
    }
}

/// Minimal SSE reader over a streaming response
struct Events {
    response: reqwest::Response,
    buffer: Vec<u8>,
}

/// Split the first complete event block off `buffer`. Bytes are only
/// decoded once the whole block has arrived, so a character split across
/// chunks stays intact.
fn take_block(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|w| w == b"\n\n")?;
    let block: Vec<u8> = buffer.drain(..pos + 2).collect();
    Some(String::from_utf8(block).expect("event block is not UTF-8"))
}

fn parse_block(block: &str) -> Option<(String, String)> {
    let mut event = None;
    let mut data = Vec::new();
    for line in block.lines() {
        if let Some(v) = line.strip_prefix("event:") {
            event = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            data.push(v.strip_prefix(' ').unwrap_or(v).to_string());
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some((event.unwrap_or_else(|| "message".into()), data.join("\n")))
}

impl Events {
    async fn next(&mut self) -> Option<(String, String)> {
        loop {
            while let Some(block) = take_block(&mut self.buffer) {
                if let Some(event) = parse_block(&block) {
                    return Some(event);
                }
            }
            let chunk = self.response.chunk().await.ok()??;
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Next event named `name`, skipping heartbeats
    async fn expect(&mut self, name: &str) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (event, data) = self.next().await.expect("stream ended");
                if event == name {
                    return data;
                }
                assert_eq!(event, "ping", "unexpected event {event}: {data}");
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn reply(&mut self) -> Value {
        serde_json::from_str(&self.expect("message").await).unwrap()
    }
}

impl Harness {
    async fn connect(&self, bearer: &str) -> (Events, String) {
        let response = self
            .http
            .get(format!("{}/sse", self.base))
            .bearer_auth(bearer)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let mut events = Events {
            response,
            buffer: Vec::new(),
        };
        let path = events.expect("endpoint").await;
        assert!(path.starts_with("/sse/message?sessionId="), "{path}");
        (events, path)
    }

    async fn post(&self, path: &str, body: impl Into<reqwest::Body>) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    async fn rpc(&self, path: &str, message: Value) {
        let response = self.post(path, message.to_string()).await;
        assert_eq!(response.status(), 204);
        assert!(response.bytes().await.unwrap().is_empty());
    }
}

fn session_id(path: &str) -> &str {
    path.split("sessionId=").nth(1).unwrap()
}

#[tokio::test]
async fn test_tools_list_over_stream() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    h.rpc(&path, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await;
    let reply = events.reply().await;
    assert_eq!(reply["id"], 1);

    let tools = reply["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        vec![
            "search_engine",
            "scrape",
            "e_commerce_data",
            "social_professional_data",
            "business_data_data",
        ]
    );

    let group = &tools[2];
    let description = group["description"].as_str().unwrap();
    assert!(description.contains("For site 'amazon', available tasks are: [product, product_reviews]."));
    assert_eq!(group["inputSchema"]["required"], json!(["site", "task"]));
}

#[tokio::test]
async fn test_handshake_then_call() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;
    let id = session_id(&path).to_string();

    h.rpc(&path, json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await;
    let reply = events.reply().await;
    assert_eq!(reply["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(h.sessions.get(&id).unwrap().state(), HandshakeState::PendingAck);

    h.rpc(&path, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    assert_eq!(h.sessions.get(&id).unwrap().state(), HandshakeState::Initialized);
}

#[tokio::test]
async fn test_call_before_initialize() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    h.rpc(
        &path,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
               "params": {"name": "search_engine", "arguments": {"query": "x"}}}),
    )
    .await;
    let reply = events.reply().await;
    assert_eq!(reply["id"], 2);
    assert_eq!(
        reply["result"]["content"][0]["text"],
        "fetched https://google.com/search?q=x"
    );

    let id = session_id(&path);
    assert_eq!(h.sessions.get(id).unwrap().state(), HandshakeState::Initialized);
}

#[tokio::test]
async fn test_unknown_tool() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    h.rpc(
        &path,
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "nonexistent_tool"}}),
    )
    .await;
    let reply = events.reply().await;
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(reply["error"]["message"], "Tool not found: nonexistent_tool");
}

#[tokio::test]
async fn test_group_tool_rejects_unknown_task() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    h.rpc(
        &path,
        json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
               "params": {"name": "e_commerce_data", "arguments": {"site": "amazon", "task": "bogus"}}}),
    )
    .await;
    let reply = events.reply().await;
    assert_eq!(reply["error"]["code"], -32602);
    let message = reply["error"]["message"].as_str().unwrap();
    assert!(message.contains("Available tasks are: [product, product_reviews]"), "{message}");

    // the session is still usable afterwards
    h.rpc(&path, json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}))
        .await;
    assert_eq!(events.reply().await["id"], 5);
}

#[tokio::test]
async fn test_batch_replies_in_order() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    h.rpc(
        &path,
        json!([
            {"jsonrpc": "2.0", "id": "a", "method": "initialize"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": "b", "method": "tools/list"}
        ]),
    )
    .await;
    assert_eq!(events.reply().await["id"], "a");
    assert_eq!(events.reply().await["id"], "b");
}

#[tokio::test]
async fn test_unparseable_body() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    let response = h.post(&path, "{oops").await;
    assert_eq!(response.status(), 204);
    let reply = events.reply().await;
    assert_eq!(reply["error"]["code"], -32700);
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn test_disconnect_expires_session() {
    let h = start(None).await;
    let (events, path) = h.connect(TOKEN).await;
    let id = session_id(&path).to_string();
    assert!(h.sessions.get(&id).is_some());

    drop(events);

    let expired = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = h.post(&path, json!({"id": 1, "method": "tools/list"}).to_string()).await;
            if response.status() == 404 {
                return response.json::<Value>().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("session never expired");

    assert_eq!(expired, json!({"error": "Invalid or expired session ID"}));
    assert!(h.sessions.get(&id).is_none());
}

#[tokio::test]
async fn test_unknown_session() {
    let h = start(None).await;
    let response = h
        .post("/sse/message?sessionId=does-not-exist", r#"{"id":1,"method":"tools/list"}"#)
        .await;
    assert_eq!(response.status(), 404);

    let response = h.post("/sse/message", r#"{"id":1,"method":"tools/list"}"#).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_stream_requires_token() {
    let h = start(None).await;
    let url = format!("{}/sse", h.base);

    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.text().await.unwrap(), "Unauthorized: Missing Bearer token");

    let response = h.http.get(&url).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(response.text().await.unwrap(), "Forbidden: Invalid token");
    assert_eq!(h.sessions.count(), 0);
}

#[tokio::test]
async fn test_metered_billing_refusal() {
    let h = start(Some(refusing_billing_stub().await)).await;
    let (mut events, path) = h.connect("customer-key").await;
    let id = session_id(&path).to_string();

    h.rpc(
        &path,
        json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
               "params": {"name": "search_engine", "arguments": {"query": "x"}}}),
    )
    .await;
    let reply = events.reply().await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32001);
    assert_eq!(reply["error"]["message"], "Insufficient credits");
    assert_eq!(h.sessions.get(&id).unwrap().state(), HandshakeState::Uninitialized);
}

#[tokio::test]
async fn test_metered_requires_credential() {
    let h = start(Some(refusing_billing_stub().await)).await;
    let response = h.http.get(format!("{}/sse", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({"error": "Unauthorized: Missing bearer credential."})
    );
}

#[test]
fn test_reader_keeps_split_characters() {
    let frame = "event: message\ndata: {\"text\":\"ツール\"}\n\n".as_bytes();
    let split = frame.iter().position(|&b| b >= 0x80).unwrap() + 1;

    let mut buffer = frame[..split].to_vec();
    assert!(take_block(&mut buffer).is_none());
    buffer.extend_from_slice(&frame[split..]);

    let block = take_block(&mut buffer).unwrap();
    assert!(buffer.is_empty());
    let (event, data) = parse_block(&block).unwrap();
    assert_eq!(event, "message");
    assert_eq!(data, r#"{"text":"ツール"}"#);
}

#[tokio::test]
async fn test_unicode_reply_over_stream() {
    let h = start(None).await;
    let (mut events, path) = h.connect(TOKEN).await;

    h.rpc(
        &path,
        json!({"jsonrpc": "2.0", "id": 30, "method": "tools/call", "params": {"name": "検索ツール"}}),
    )
    .await;
    let reply = events.reply().await;
    assert_eq!(reply["error"]["message"], "Tool not found: 検索ツール");
}
