//! In-process fake transport for unit tests
//!
//! [`FakeTransport::new`] returns the transport plus a [`FakeTransportHandle`]
//! the test drives:
//!
//! ```text
//! client send()      -> outbound_tx -> handle.outbound_rx
//! handle.inbound_tx  -> inbound_rx  -> client receive()
//! ```
//!
//! Dropping `handle.inbound_tx` ends the `receive()` stream, which is how a
//! test simulates a server that goes away. [`FakeServer`] wraps the handle
//! with a scripted `initialize` responder for connection-manager tests.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{KotaError, Result};
use crate::mcp::transport::Transport;

/// In-process fake transport.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: Arc<AtomicBool>,
}

/// The test side of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages the client will receive.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Set once `close()` has been called on the transport.
    pub closed: Arc<AtomicBool>,
}

impl FakeTransport {
    /// Create a connected `(transport, handle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            closed: Arc::clone(&closed),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closed,
        };
        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KotaError::McpTransport("FakeTransport is closed".into()).into());
        }
        self.outbound_tx.send(message).map_err(|e| {
            KotaError::McpTransport(format!("FakeTransport outbound channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// How a [`FakeServer`] answers `initialize`.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Reply with this `result` object.
    Respond(serde_json::Value),
    /// Reply with a JSON-RPC error.
    Error(String),
    /// Never reply.
    Hang,
    /// Close the connection as soon as `initialize` arrives.
    Exit,
}

/// A scripted server on the far side of a [`FakeTransportHandle`].
pub struct FakeServer;

impl FakeServer {
    /// A minimal valid `initialize` result.
    pub fn initialize_result(name: &str) -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": crate::mcp::types::LATEST_PROTOCOL_VERSION,
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": name, "version": "1.0.0" }
        })
    }

    /// Serve `handle` in the background.
    ///
    /// The returned receiver yields every method name the client sent.
    pub fn spawn(
        mut handle: FakeTransportHandle,
        behavior: FakeBehavior,
    ) -> mpsc::UnboundedReceiver<String> {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut inbound_tx = Some(handle.inbound_tx);
            while let Some(raw) = handle.outbound_rx.recv().await {
                let Ok(msg) = serde_json::from_str::<serde_json::Value>(&raw) else {
                    continue;
                };
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                let _ = seen_tx.send(method.clone());
                if method != crate::mcp::types::METHOD_INITIALIZE {
                    continue;
                }
                if matches!(behavior, FakeBehavior::Exit) {
                    inbound_tx = None;
                    continue;
                }
                let Some(tx) = inbound_tx.as_ref() else {
                    continue;
                };
                let reply = match &behavior {
                    FakeBehavior::Respond(result) => {
                        serde_json::json!({ "jsonrpc": "2.0", "id": msg["id"], "result": result })
                    }
                    FakeBehavior::Error(message) => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": msg["id"],
                        "error": { "code": -32603, "message": message }
                    }),
                    FakeBehavior::Hang | FakeBehavior::Exit => continue,
                };
                let _ = tx.send(reply.to_string());
            }
        });
        seen_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_to_handle() {
        let (transport, mut handle) = FakeTransport::new();
        transport.send("msg".to_string()).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "msg");
    }

    #[tokio::test]
    async fn test_receive_ends_when_inbound_dropped() {
        let (transport, handle) = FakeTransport::new();
        handle.inbound_tx.send("one".into()).unwrap();
        drop(handle);

        let mut stream = transport.receive();
        assert_eq!(stream.next().await.as_deref(), Some("one"));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_close_marks_handle_and_rejects_send() {
        let (transport, handle) = FakeTransport::new();
        transport.close().await.unwrap();
        assert!(handle.closed.load(Ordering::SeqCst));
        assert!(transport.send("x".into()).await.is_err());
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }
}
