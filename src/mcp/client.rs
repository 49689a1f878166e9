//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] writes serialized requests to an outbound channel and
//! resolves them when [`start_read_loop`] sees the matching response on the
//! inbound channel. The transport on the other side of those channels is
//! wired up by [`crate::mcp::protocol::McpSession`].
//!
//! - Outbound messages are single JSON objects without framing; each
//!   transport adds its own (newline for stdio, one POST per message for HTTP).
//! - In-flight requests live in a `pending` map keyed by request id. When the
//!   read loop stops, the map is cleared and every waiting caller gets an
//!   error instead of hanging.
//! - Server-initiated `ping` requests are answered; other server requests
//!   get `-32601 Method not found`. Notifications are logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{KotaError, Result};
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, METHOD_PING};

/// Timeout applied to a request when the caller does not pass one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Channel-backed JSON-RPC 2.0 client for one server connection.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use kota::mcp::client::{start_read_loop, JsonRpcClient};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let client = Arc::new(JsonRpcClient::new("dev", out_tx));
///     let _handle = start_read_loop(in_rx, CancellationToken::new(), Arc::clone(&client));
///     Ok(())
/// }
/// ```
pub struct JsonRpcClient {
    /// Server name used in timeout errors.
    server: String,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client that writes to `outbound_tx`.
    ///
    /// # Arguments
    ///
    /// * `server` - Name of the server, reported in timeout errors.
    /// * `outbound_tx` - Sender half of the outbound message channel.
    pub fn new(server: impl Into<String>, outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound_tx,
        }
    }

    /// Send a request and wait for its result.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - Serialized into the `params` field.
    /// * `timeout` - Defaults to [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// - [`KotaError::McpTransport`] if the outbound channel is closed or the
    ///   read loop stops before the response arrives.
    /// - [`KotaError::McpTimeout`] if no response arrives in time.
    /// - [`KotaError::Mcp`] if the server answers with an error object.
    /// - [`KotaError::Serialization`] if the result does not deserialize.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so a fast response always finds its slot.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest::new(
            id,
            method,
            Some(serde_json::to_value(params)?),
        ))?;
        tracing::debug!(server = %self.server, "-> {}", message);

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(KotaError::McpTransport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(KotaError::McpTimeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            KotaError::McpTransport("connection closed before response arrived".to_string())
        })?;
        let value = rpc_result.map_err(|e| KotaError::Mcp(e.message))?;

        serde_json::from_value(value).map_err(|e| KotaError::Serialization(e).into())
    }

    /// Send a notification. No response is expected.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::McpTransport`] if the outbound channel is closed.
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcRequest::notification(
            method,
            Some(serde_json::to_value(params)?),
        ))?;
        tracing::debug!(server = %self.server, "-> {}", message);

        self.outbound_tx
            .send(message)
            .map_err(|_| KotaError::McpTransport("outbound channel closed".to_string()))?;
        Ok(())
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Start the read loop as a background task.
///
/// The loop stops when `cancellation` fires or the inbound channel closes.
/// Either way all pending requests are failed.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                maybe_msg = inbound_rx.recv() => match maybe_msg {
                    Some(raw) => dispatch_message(&raw, &client).await,
                    None => break,
                },
            }
        }
        // Dropping the senders wakes every waiting caller with an error.
        client.pending.lock().await.clear();
        tracing::debug!(server = %client.server, "read loop stopped");
    })
}

async fn dispatch_message(raw: &str, client: &JsonRpcClient) {
    tracing::debug!(server = %client.server, "<- {}", raw);
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(server = %client.server, "ignoring unparsable message: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_outcome = value.get("result").is_some() || value.get("error").is_some();

    if has_id && has_outcome && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client);
    } else if has_method {
        let method = value["method"].as_str().unwrap_or_default();
        tracing::debug!(server = %client.server, "ignoring notification '{method}'");
    } else {
        tracing::debug!(server = %client.server, "ignoring unclassifiable message");
    }
}

async fn handle_response(value: serde_json::Value, client: &JsonRpcClient) {
    let id_val = &value["id"];
    let Some(id) = id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse().ok()))
    else {
        tracing::warn!(server = %client.server, "response has non-integer id: {id_val}");
        return;
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(server = %client.server, "response for unknown id {id}");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: JsonRpcError::INTERNAL_ERROR,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

fn handle_server_request(value: serde_json::Value, client: &JsonRpcClient) {
    let method = value["method"].as_str().unwrap_or_default().to_string();
    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);

    let response = if method == METHOD_PING {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::json!({})),
            error: None,
        }
    } else {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: JsonRpcError::METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
