//! Stdio connection integration tests
//!
//! Drives the `ConnectionManager` and the raw `StdioTransport` against the
//! `mcp_test_server` subprocess in each of its modes.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use kota::error::KotaError;
use kota::mcp::manager::{ConnectOptions, ConnectionManager};
use kota::mcp::protocol::McpSession;
use kota::mcp::store::ServerConfigStore;
use kota::mcp::transport::stdio::StdioTransport;
use kota::mcp::transport::DefaultTransportFactory;
use kota::mcp::types::Implementation;

use common::{registry_path, test_server_config, test_server_exe};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn manager_with(dir: &TempDir, servers: &[(&str, &str)]) -> ConnectionManager {
    let mut store = ServerConfigStore::load(registry_path(dir.path()));
    for (name, mode) in servers {
        store
            .add_or_replace(test_server_config(name, mode))
            .expect("add server");
    }
    let factory = DefaultTransportFactory {
        request_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
    };
    let options = ConnectOptions {
        handshake_timeout: Duration::from_secs(2),
        client_info: Implementation {
            name: "kota-test".into(),
            version: "0.0.0".into(),
        },
    };
    ConnectionManager::with_factory(store, Arc::new(factory), options)
}

fn assert_connection_error(err: &anyhow::Error, server: &str) {
    match err.downcast_ref::<KotaError>() {
        Some(KotaError::Connection { server: s, .. }) => assert_eq!(s, server),
        other => panic!("expected Connection error, got {other:?}: {err:#}"),
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager over real subprocesses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_negotiates_capabilities() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(&dir, &[("dev", "normal")]);

    let caps = manager.connect(None).await.expect("connect");
    assert_eq!(caps.protocol_version, "2025-11-25");
    assert_eq!(caps.server_name.as_deref(), Some("mcp-test-server"));
    assert_eq!(caps.server_version.as_deref(), Some("0.1.0"));
    assert!(caps.supported_features.contains(&"tools".to_string()));
    assert!(caps.supported_features.contains(&"resources".to_string()));
    assert_eq!(caps.supported_models[0].id, "test-model");

    assert!(manager.is_connected());
    assert_eq!(manager.current_server().as_deref(), Some("dev"));

    let reloaded = ServerConfigStore::load(registry_path(dir.path()));
    assert!(reloaded.get_by_name("dev").unwrap().last_used.is_some());

    manager.disconnect().await;
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_reconnect_replaces_previous_server() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(&dir, &[("first", "normal"), ("second", "normal")]);

    manager.connect(Some("first")).await.expect("first connect");
    manager.connect(Some("second")).await.expect("second connect");
    assert_eq!(manager.current_server().as_deref(), Some("second"));

    manager.disconnect().await;
}

#[tokio::test]
async fn test_failed_handshakes_leave_manager_disconnected() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(
        &dir,
        &[
            ("early-exit", "exit-before-init"),
            ("malformed", "malformed"),
            ("hang", "hang"),
        ],
    );

    for name in ["early-exit", "malformed", "hang"] {
        let err = manager.connect(Some(name)).await.unwrap_err();
        assert_connection_error(&err, name);
        assert!(!manager.is_connected(), "{name}");
        assert!(manager.current_server().is_none(), "{name}");
    }

    let reloaded = ServerConfigStore::load(registry_path(dir.path()));
    assert!(reloaded.list().iter().all(|s| s.last_used.is_none()));
}

#[tokio::test]
async fn test_malformed_result_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(&dir, &[("malformed", "malformed")]);

    let err = manager.connect(None).await.unwrap_err();
    assert!(format!("{err:#}").contains("malformed"), "{err:#}");
}

#[tokio::test]
async fn test_missing_executable_is_connection_error() {
    let dir = TempDir::new().unwrap();
    let mut store = ServerConfigStore::load(registry_path(dir.path()));
    store
        .add_or_replace(kota::mcp::ServerConfig::stdio(
            "ghost",
            "/nonexistent/definitely-not-a-server",
        ))
        .unwrap();
    let mut manager = ConnectionManager::new(store);

    let err = manager.connect(Some("ghost")).await.unwrap_err();
    assert_connection_error(&err, "ghost");
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_server_exit_clears_connection() {
    let dir = TempDir::new().unwrap();
    let mut manager = manager_with(&dir, &[("flaky", "exit-after-init")]);
    let mut status = manager.subscribe();

    // The server exits right after the handshake, so connect may lose the
    // race; either way the manager must end up disconnected.
    if manager.connect(None).await.is_ok() {
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|c| !c))
            .await
            .expect("exit observed")
            .expect("status channel open");
    }
    assert!(!manager.is_connected());
    assert!(manager.current_server().is_none());
}

// ---------------------------------------------------------------------------
// Raw transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_session_over_stdio_transport() {
    let exited = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&exited);
    let transport = StdioTransport::spawn(
        test_server_exe(),
        vec![],
        HashMap::new(),
        None,
        Duration::from_millis(500),
        Box::new(move || flag.store(true, Ordering::SeqCst)),
    )
    .expect("spawn mcp_test_server; was it built?");
    let pid = transport.pid().expect("child pid");

    let session = McpSession::start("raw", Arc::new(transport));
    let caps = session
        .initialize(
            Implementation {
                name: "kota-test".into(),
                version: "0.0.0".into(),
            },
            Duration::from_secs(2),
        )
        .await
        .expect("initialize");
    assert_eq!(caps.server_name.as_deref(), Some("mcp-test-server"));

    session.shutdown().await;
    assert!(!exited.load(Ordering::SeqCst), "close must not count as an exit");

    #[cfg(target_os = "linux")]
    assert!(
        !std::path::Path::new(&format!("/proc/{pid}")).exists(),
        "child {pid} still running after shutdown"
    );
    let _ = pid;
}
