//! MCP wire types and JSON-RPC 2.0 primitives
//!
//! Only the lifecycle subset of the protocol lives here: the JSON-RPC
//! envelope, the `initialize` exchange, and the method names used by the
//! connection manager. Struct fields are `camelCase` on the wire and
//! `Option<>` fields omit their key when `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// Protocol revision offered in `initialize`.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// All protocol versions this client accepts during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    LATEST_PROTOCOL_VERSION,
    "2025-06-18",
    "2025-03-26",
    "2024-11-05",
];

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Opens a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Sent by the client once `initialize` has succeeded.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Keepalive ping.
pub const METHOD_PING: &str = "ping";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// `id` is `None` only for notifications.
///
/// # Examples
///
/// ```
/// use kota::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(1, "ping", None);
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["jsonrpc"], "2.0");
/// assert_eq!(json["id"], 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier. Absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Method name.
    pub method: String,
    /// Method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request with a numeric id.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params,
        }
    }

    /// Build a notification (no id, no response expected).
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present in a valid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// `id` of the request being answered.
    pub id: serde_json::Value,
    /// Set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
///
/// # Examples
///
/// ```
/// use kota::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32601, message: "Method not found".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32601: Method not found");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Extra details supplied by the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// JSON-RPC "Method not found".
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// JSON-RPC "Internal error".
    pub const INTERNAL_ERROR: i64 = -32603;
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Initialize exchange
// ---------------------------------------------------------------------------

/// Identifies a client implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    /// Short name of the implementation (e.g. `"kota"`).
    pub name: String,
    /// Version string.
    pub version: String,
}

/// Server identity as reported in `initialize`; both fields are optional
/// because some servers omit them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server implementation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Server implementation version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A model a server can serve, as advertised in `supportedModels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedModel {
    /// Model identifier.
    pub id: String,
    /// Human-readable model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Revision the client asks for.
    pub protocol_version: String,
    /// Capabilities advertised by this client (none beyond the core protocol).
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    /// Who is connecting.
    pub client_info: Implementation,
}

/// Result returned by the server to an `initialize` request.
///
/// `supportedFeatures` and `supportedModels` are optional extensions some
/// servers add next to the standard fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Revision the server picked.
    pub protocol_version: String,
    /// Capability objects advertised by the server, keyed by feature name.
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
    /// Information identifying the server implementation.
    #[serde(default)]
    pub server_info: ServerInfo,
    /// Explicit feature list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_features: Option<Vec<String>>,
    /// Models the server can serve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_models: Option<Vec<SupportedModel>>,
}
