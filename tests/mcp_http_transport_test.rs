//! HTTP connection integration tests
//!
//! Runs the `HttpTransport` and the `ConnectionManager` against a `wiremock`
//! server.
//!
//! # wiremock body helpers
//!
//! Use `set_body_raw(bytes, mime)` so the `Content-Type` is exactly what the
//! test means: `set_body_string` forces `text/plain` and `set_body_json`
//! forces `application/json`.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, headers, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kota::error::KotaError;
use kota::mcp::manager::{ConnectOptions, ConnectionManager};
use kota::mcp::server::{HttpConnection, ServerConfig, ServerConnection};
use kota::mcp::store::ServerConfigStore;
use kota::mcp::transport::http::HttpTransport;
use kota::mcp::transport::{DefaultTransportFactory, Transport};

use common::registry_path;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_transport(base_url: &str) -> HttpTransport {
    HttpTransport::new(
        url::Url::parse(base_url).expect("valid url"),
        HashMap::new(),
        Duration::from_secs(5),
    )
    .expect("client builds")
}

async fn drain_receive(transport: &HttpTransport, deadline: Duration) -> Vec<String> {
    use futures::StreamExt;

    let mut messages = Vec::new();
    let mut stream = transport.receive();
    while let Ok(Some(msg)) = tokio::time::timeout(deadline, stream.next()).await {
        messages.push(msg);
    }
    messages
}

fn initialize_body() -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "protocolVersion": "2025-06-18",
            "capabilities": { "tools": {}, "prompts": {} },
            "serverInfo": { "name": "remote-test", "version": "3.0.0" }
        }
    })
    .to_string()
}

fn http_server(name: &str, url: &str, api_key: Option<&str>, headers: &[(&str, &str)]) -> ServerConfig {
    ServerConfig::new(
        name,
        ServerConnection::Http(HttpConnection {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }),
    )
}

fn manager_with(dir: &TempDir, config: ServerConfig) -> ConnectionManager {
    let mut store = ServerConfigStore::load(registry_path(dir.path()));
    store.add_or_replace(config).expect("add server");
    let factory = DefaultTransportFactory {
        request_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
    };
    let options = ConnectOptions {
        handshake_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    ConnectionManager::with_factory(store, Arc::new(factory), options)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_json_response_forwarded_to_receive() {
    let server = MockServer::start().await;
    let body = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
    // wiremock splits a comma-separated header into its values.
    Mock::given(method("POST"))
        .and(headers("accept", vec!["application/json", "text/event-stream"]))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json"),
        )
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string())
        .await
        .expect("send should succeed");

    let messages = drain_receive(&transport, Duration::from_millis(200)).await;
    assert_eq!(messages, vec![body.to_string()]);
}

#[tokio::test]
async fn test_sse_response_events_forwarded() {
    let server = MockServer::start().await;
    let sse = "event: ping\ndata: [PING]\n\nid: 7\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string())
        .await
        .unwrap();

    let messages = drain_receive(&transport, Duration::from_millis(300)).await;
    assert_eq!(messages, vec![r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()]);
}

#[tokio::test]
async fn test_accepted_notification_produces_no_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
        .await
        .unwrap();
    assert!(drain_receive(&transport, Duration::from_millis(100)).await.is_empty());
}

#[tokio::test]
async fn test_unauthorized_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    let err = transport.send("{}".to_string()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<KotaError>(),
        Some(KotaError::McpTransport(msg)) if msg.contains("authentication")
    ));
}

#[tokio::test]
async fn test_close_without_session_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// ConnectionManager over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_and_disconnect_http_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "initialize" })))
        .and(header("authorization", "Bearer sk-live"))
        .and(header("x-team", "core"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("MCP-Session-Id", "sess-1")
                .set_body_raw(initialize_body().into_bytes(), "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "notifications/initialized" })))
        .and(header("mcp-session-id", "sess-1"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(header("mcp-session-id", "sess-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    // The api key wins over an explicit Authorization header.
    let config = http_server(
        "remote",
        &server.uri(),
        Some("sk-live"),
        &[("Authorization", "Bearer stale"), ("X-Team", "core")],
    );
    let mut manager = manager_with(&dir, config);

    let caps = manager.connect(Some("remote")).await.expect("connect");
    assert_eq!(caps.protocol_version, "2025-06-18");
    assert_eq!(caps.server_name.as_deref(), Some("remote-test"));
    let mut features = caps.supported_features.clone();
    features.sort();
    assert_eq!(features, vec!["prompts", "tools"]);
    assert!(manager.is_connected());

    manager.disconnect().await;
    assert!(!manager.is_connected());
    // Expectations are verified when `server` drops.
}

#[tokio::test]
async fn test_unauthorized_connect_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(&dir, http_server("locked", &server.uri(), None, &[]));

    let err = manager.connect(None).await.unwrap_err();
    match err.downcast_ref::<KotaError>() {
        Some(KotaError::Connection { server, message }) => {
            assert_eq!(server, "locked");
            assert!(message.contains("authentication"), "{message}");
        }
        other => panic!("expected Connection error, got {other:?}"),
    }
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_unsupported_protocol_version_rejected() {
    let server = MockServer::start().await;
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "protocolVersion": "1999-01-01", "capabilities": {} }
    })
    .to_string();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "application/json"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(&dir, http_server("old", &server.uri(), None, &[]));

    let err = manager.connect(None).await.unwrap_err();
    assert!(format!("{err:#}").contains("1999-01-01"), "{err:#}");
    assert!(!manager.is_connected());
}
