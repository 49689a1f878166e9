//! MCP session lifecycle over a [`Transport`]
//!
//! [`McpSession`] owns everything one live connection needs: the transport,
//! the [`JsonRpcClient`], the read loop and the tasks that move messages
//! between the client's channels and the transport. It performs the
//! `initialize` / `notifications/initialized` handshake and turns the
//! server's answer into [`ServerCapabilities`].
//!
//! When the transport's inbound stream ends (child exited, connection
//! dropped) the session cancels itself, so a request that is still waiting
//! fails right away instead of running into its timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{KotaError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    Implementation, InitializeParams, InitializeResult, JsonRpcError, SupportedModel,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, SUPPORTED_PROTOCOL_VERSIONS,
};

// ---------------------------------------------------------------------------
// ServerCapabilities
// ---------------------------------------------------------------------------

/// What a server reported about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Protocol revision the server selected.
    pub protocol_version: String,
    /// `serverInfo.name`, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// `serverInfo.version`, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Explicit `supportedFeatures` followed by advertised capability keys,
    /// without duplicates.
    #[serde(default)]
    pub supported_features: Vec<String>,
    /// Models the server can serve.
    #[serde(default)]
    pub supported_models: Vec<SupportedModel>,
}

impl ServerCapabilities {
    /// Build capabilities from a raw `initialize` result.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Mcp`] when the result is not an object or lacks
    /// `protocolVersion`, and [`KotaError::McpProtocolVersion`] when the
    /// version is not one this client speaks.
    ///
    /// # Examples
    ///
    /// ```
    /// use kota::mcp::protocol::ServerCapabilities;
    ///
    /// let caps = ServerCapabilities::from_initialize_result(serde_json::json!({
    ///     "protocolVersion": "2025-06-18",
    ///     "capabilities": { "tools": {} },
    ///     "supportedFeatures": ["chat"]
    /// }))
    /// .unwrap();
    /// assert_eq!(caps.supported_features, vec!["chat", "tools"]);
    /// ```
    pub fn from_initialize_result(result: serde_json::Value) -> Result<Self> {
        if !result.is_object() {
            return Err(KotaError::Mcp(format!(
                "malformed initialize result: expected an object, got {}",
                result
            ))
            .into());
        }
        let parsed: InitializeResult = serde_json::from_value(result)
            .map_err(|e| KotaError::Mcp(format!("malformed initialize result: {}", e)))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&parsed.protocol_version.as_str()) {
            return Err(KotaError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: parsed.protocol_version,
            }
            .into());
        }

        let mut features: Vec<String> = Vec::new();
        let explicit = parsed.supported_features.unwrap_or_default();
        for feature in explicit.into_iter().chain(parsed.capabilities.into_iter().map(|(k, _)| k)) {
            if !features.contains(&feature) {
                features.push(feature);
            }
        }

        Ok(Self {
            protocol_version: parsed.protocol_version,
            server_name: parsed.server_info.name,
            server_version: parsed.server_info.version,
            supported_features: features,
            supported_models: parsed.supported_models.unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// McpSession
// ---------------------------------------------------------------------------

/// One live connection: transport, JSON-RPC client and background tasks.
#[derive(Debug)]
pub struct McpSession {
    server: String,
    transport: Arc<dyn Transport>,
    client: Arc<JsonRpcClient>,
    cancellation: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl McpSession {
    /// Wire `transport` to a fresh [`JsonRpcClient`] and start the
    /// background tasks. Must be called inside a Tokio runtime.
    pub fn start(server: &str, transport: Arc<dyn Transport>) -> Self {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let cancellation = CancellationToken::new();
        let client = Arc::new(JsonRpcClient::new(server, out_tx));

        let read_loop = start_read_loop(in_rx, cancellation.clone(), Arc::clone(&client));

        // Client -> transport. A failed send answers the request with an
        // error so the caller does not wait for its timeout.
        let writer = {
            let transport = Arc::clone(&transport);
            let token = cancellation.clone();
            let in_tx = in_tx.clone();
            let server = server.to_string();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        _ = token.cancelled() => break,
                        msg = out_rx.recv() => match msg {
                            Some(m) => m,
                            None => break,
                        },
                    };
                    if let Err(e) = transport.send(message.clone()).await {
                        tracing::warn!(server = %server, "send failed: {:#}", e);
                        if let Some(reply) = failed_request_reply(&message, &e) {
                            let _ = in_tx.send(reply);
                        }
                    }
                }
                // Flush what was queued before the shutdown, best effort.
                while let Ok(message) = out_rx.try_recv() {
                    if let Err(e) = transport.send(message).await {
                        tracing::debug!(server = %server, "dropping queued message: {:#}", e);
                        break;
                    }
                }
            })
        };

        // Transport -> client. End of stream cancels the whole session.
        let reader = {
            let transport = Arc::clone(&transport);
            let token = cancellation.clone();
            let server = server.to_string();
            tokio::spawn(async move {
                let mut inbound = transport.receive();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        msg = inbound.next() => match msg {
                            Some(m) => {
                                if in_tx.send(m).is_err() {
                                    break;
                                }
                            }
                            None => {
                                tracing::debug!(server = %server, "inbound stream ended");
                                token.cancel();
                                break;
                            }
                        },
                    }
                }
            })
        };

        let diagnostics = {
            let transport = Arc::clone(&transport);
            let token = cancellation.clone();
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = transport.receive_err();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        line = lines.next() => match line {
                            Some(line) => tracing::debug!(server = %server, "server stderr: {}", line),
                            None => break,
                        },
                    }
                }
            })
        };

        Self {
            server: server.to_string(),
            transport,
            client,
            cancellation,
            tasks: vec![read_loop, writer, reader, diagnostics],
        }
    }

    /// Whether the session has stopped (shut down or peer gone).
    pub fn is_closed(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Perform the `initialize` handshake.
    ///
    /// Sends `initialize`, validates the result, then sends
    /// `notifications/initialized`.
    ///
    /// # Errors
    ///
    /// Any failure of the exchange: transport errors, the peer going away,
    /// [`KotaError::McpTimeout`] after `timeout`, a JSON-RPC error reply, a
    /// malformed result or an unsupported protocol version.
    pub async fn initialize(
        &self,
        client_info: Implementation,
        timeout: Duration,
    ) -> Result<ServerCapabilities> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::Map::new(),
            client_info,
        };
        let result: serde_json::Value = self
            .client
            .request(METHOD_INITIALIZE, params, Some(timeout))
            .await?;
        let capabilities = ServerCapabilities::from_initialize_result(result)?;

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        tracing::debug!(
            server = %self.server,
            "negotiated protocol {} with {} feature(s)",
            capabilities.protocol_version,
            capabilities.supported_features.len()
        );
        Ok(capabilities)
    }

    /// Stop the background tasks, then close the transport.
    ///
    /// Messages already queued are flushed before the close. Never fails;
    /// close errors are logged.
    pub async fn shutdown(self) {
        self.cancellation.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        if let Err(e) = self.transport.close().await {
            tracing::warn!(server = %self.server, "error while closing transport: {:#}", e);
        }
        tracing::debug!(server = %self.server, "session shut down");
    }
}

/// JSON-RPC error reply for a request that could not be sent.
fn failed_request_reply(message: &str, error: &anyhow::Error) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    let id = value.get("id").filter(|id| !id.is_null())?;
    let reply = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": JsonRpcError {
            code: JsonRpcError::INTERNAL_ERROR,
            message: format!("{:#}", error),
            data: None,
        }
    });
    Some(reply.to_string())
}
