//! Streamable HTTP/SSE transport for MCP
//!
//! Every outbound JSON-RPC message is an HTTP POST to the endpoint. The
//! server replies with one of:
//!
//! - `application/json` -- the body is one inbound message
//! - `text/event-stream` -- each SSE `data:` event is one inbound message
//! - `202 Accepted` -- acknowledgement without a body (notifications)
//!
//! # Session management
//!
//! The first `MCP-Session-Id` response header is stored and sent on every
//! later request. A `404` while a session is active means the session
//! expired. [`Transport::close`] sends `DELETE` with the session id.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{KotaError, Result};
use crate::mcp::transport::Transport;
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "MCP-Session-Id";

/// Header carrying the protocol revision on every request.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Streamable HTTP/SSE transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use kota::mcp::transport::http::HttpTransport;
///
/// # fn main() -> anyhow::Result<()> {
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp")?,
///     HashMap::new(),
///     Duration::from_secs(30),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    session_id: Arc<RwLock<Option<String>>>,
    /// Extra headers sent with every request (auth lives here).
    headers: HashMap<String, String>,
    response_tx: mpsc::UnboundedSender<String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
}

impl HttpTransport {
    /// Build a transport for `endpoint`. No network I/O happens here.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The MCP server URL.
    /// * `headers` - Added to every request.
    /// * `timeout` - Applied to each HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::McpTransport`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KotaError::McpTransport(format!("failed to build HTTP client: {}", e)))?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            headers,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            last_event_id: Arc::new(RwLock::new(None)),
        })
    }

    /// The session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn with_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// POST one JSON-RPC message.
    ///
    /// # Errors
    ///
    /// - [`KotaError::McpTransport`] if the request fails, on `401`, or on any
    ///   other non-success status.
    /// - [`KotaError::Mcp`] on `404` while a session is active.
    async fn send(&self, message: String) -> Result<()> {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, LATEST_PROTOCOL_VERSION)
            .body(message);
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        if let Some(id) = self.last_event_id.read().await.as_deref() {
            req = req.header("Last-Event-ID", id);
        }
        req = self.with_headers(req);

        let response = req.send().await.map_err(|e| {
            KotaError::McpTransport(format!("HTTP POST to {} failed: {}", self.endpoint, e))
        })?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(KotaError::McpTransport(format!(
                "authentication failed (HTTP 401); check the server's API key {}",
                challenge
            )
            .trim_end()
            .to_string())
            .into());
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if sid.take().is_some() {
                return Err(KotaError::Mcp("mcp session expired".into()).into());
            }
            return Err(KotaError::McpTransport(format!("HTTP 404 Not Found: {}", self.endpoint)).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(KotaError::McpTransport(format!("HTTP POST returned status {}", status)).into());
        }

        if let Some(new_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!("MCP session established: {}", new_id);
                *sid = Some(new_id.to_string());
            }
        }

        let is_sse = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_sse {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            let error_tx = self.error_tx.clone();
            let last_event_id = Arc::clone(&self.last_event_id);
            tokio::spawn(async move {
                parse_sse_stream(byte_stream, response_tx, error_tx, last_event_id).await;
            });
        } else {
            let body = response.text().await.map_err(|e| {
                KotaError::McpTransport(format!("failed to read response body: {}", e))
            })?;
            let body = body.trim();
            if !body.is_empty() {
                let _ = self.response_tx.send(body.to_string());
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.response_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// SSE stream read errors.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.error_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Terminate the session with `DELETE` when one was established.
    async fn close(&self) -> Result<()> {
        let Some(sid) = self.session_id.write().await.take() else {
            return Ok(());
        };
        let req = self
            .http_client
            .delete(self.endpoint.as_str())
            .header(SESSION_HEADER, sid.as_str())
            .header(PROTOCOL_VERSION_HEADER, LATEST_PROTOCOL_VERSION);
        let response = self.with_headers(req).send().await.map_err(|e| {
            KotaError::McpTransport(format!("session DELETE to {} failed: {}", self.endpoint, e))
        })?;
        // 405 means the server does not support explicit termination.
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::METHOD_NOT_ALLOWED {
            return Err(
                KotaError::McpTransport(format!("session DELETE returned status {}", status)).into(),
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// Forward complete SSE `data:` events from `byte_stream` to `response_tx`.
///
/// - `id:` is remembered in `last_event_id`.
/// - `event: ping` and `data: [PING]` are dropped.
/// - A read error ends the stream and is reported on `error_tx`.
pub async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    response_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
) {
    use futures::StreamExt;

    let mut buffer = String::new();
    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                let _ = error_tx.send(format!("SSE stream error: {}", e));
                break;
            }
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };
        buffer.push_str(&text.replace("\r\n", "\n"));

        while let Some(pos) = buffer.find("\n\n") {
            let event_block = buffer[..pos].to_string();
            buffer.drain(..pos + 2);
            process_sse_event(&event_block, &response_tx, &last_event_id).await;
        }
    }

    if !buffer.trim().is_empty() {
        process_sse_event(&buffer, &response_tx, &last_event_id).await;
    }
}

async fn process_sse_event(
    event_block: &str,
    response_tx: &mpsc::UnboundedSender<String>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;
    let mut event_id: Option<&str> = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event_id = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
    }

    if let Some(id) = event_id {
        *last_event_id.write().await = Some(id.to_string());
    }

    if event_type.is_some_and(|et| et.eq_ignore_ascii_case("ping")) {
        return;
    }

    let data = data_lines.join("\n");
    if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
        return;
    }

    let _ = response_tx.send(data);
}
