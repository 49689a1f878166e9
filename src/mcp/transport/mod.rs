//! MCP transport abstraction and implementations
//!
//! [`Transport`] is the seam between the JSON-RPC client and the wire:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and talks
//!   newline-delimited JSON over its stdin/stdout.
//! - [`http::HttpTransport`] -- Streamable HTTP/SSE.
//! - `fake::FakeTransport` -- in-process channels, tests only.
//!
//! [`TransportFactory`] turns a persisted [`ServerConfig`] into a live
//! transport. The connection manager only ever talks to the factory, which
//! is how tests substitute fakes for real processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::error::{KotaError, Result};
use crate::mcp::server::{HttpConnection, ServerConfig, ServerConnection};

pub mod http;
pub mod stdio;

#[cfg(test)]
pub mod fake;

/// Callback fired once when a transport's peer goes away on its own
/// (for stdio: the child process exited). It is not fired by
/// [`Transport::close`].
pub type ExitCallback = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one complete JSON-RPC message to the peer.
    ///
    /// The transport adds whatever framing its medium needs.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::McpTransport`] if the underlying I/O fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Stream of inbound JSON-RPC messages, one complete object per item.
    ///
    /// The stream ends when the peer disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Stream of diagnostic lines (child stderr). Never an error condition.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Shut the transport down. Best effort and idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown signal could not be delivered; the
    /// transport is unusable afterwards either way.
    async fn close(&self) -> Result<()>;
}

/// Builds transports from server configurations.
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `config`.
    ///
    /// `on_exit` must be invoked if the peer terminates by itself.
    ///
    /// # Errors
    ///
    /// Fails before any process or socket is created when the
    /// configuration cannot be used (bad URL, missing command), and with
    /// [`KotaError::McpTransport`] when spawning fails.
    fn create(&self, config: &ServerConfig, on_exit: ExitCallback) -> Result<Arc<dyn Transport>>;
}

/// The production factory: real child processes and real HTTP.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    /// Per-request timeout for HTTP transports.
    pub request_timeout: Duration,
    /// Time a stdio child gets between SIGTERM and kill.
    pub shutdown_grace: Duration,
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(2000),
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &ServerConfig, on_exit: ExitCallback) -> Result<Arc<dyn Transport>> {
        config.validate()?;
        match &config.connection {
            ServerConnection::Stdio(stdio) => {
                tracing::debug!(
                    server = %config.name,
                    "spawning `{}` with {} arg(s)",
                    stdio.command,
                    stdio.args.len()
                );
                let transport = stdio::StdioTransport::spawn(
                    PathBuf::from(&stdio.command),
                    stdio.args.clone(),
                    stdio.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    stdio.cwd.clone(),
                    self.shutdown_grace,
                    on_exit,
                )?;
                Ok(Arc::new(transport))
            }
            ServerConnection::Http(http) => {
                let endpoint = url::Url::parse(&http.url).map_err(|e| {
                    KotaError::Validation(format!(
                        "Server '{}' has an invalid url '{}': {}",
                        config.name, http.url, e
                    ))
                })?;
                tracing::debug!(server = %config.name, "opening HTTP transport to {}", endpoint);
                let transport =
                    http::HttpTransport::new(endpoint, http_headers(http), self.request_timeout)?;
                Ok(Arc::new(transport))
            }
        }
    }
}

/// Explicit headers plus `Authorization: Bearer <api_key>`.
///
/// The derived bearer header replaces an explicit `Authorization` header
/// regardless of its case.
pub fn http_headers(http: &HttpConnection) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = http
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(key) = http.api_key.as_deref().filter(|k| !k.is_empty()) {
        headers.retain(|k, _| !k.eq_ignore_ascii_case("authorization"));
        headers.insert("Authorization".to_string(), format!("Bearer {key}"));
    }
    headers
}
