//! Error types for KOTA
//!
//! This module defines the error taxonomy shared by the MCP subsystem and
//! the command handlers, using `thiserror` for ergonomic error handling.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for KOTA operations
///
/// `Configuration`, the server-lookup variants after it, `Connection`,
/// `Persistence` and `Validation` are the user-facing failure kinds of the
/// MCP subsystem. The `Mcp*` variants are raised by the JSON-RPC client and the
/// transports, and are wrapped into [`KotaError::Connection`] by the
/// connection manager before they reach a command handler.
#[derive(Error, Debug)]
pub enum KotaError {
    /// Invalid settings or a missing input file
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A named server is not in the registry
    #[error("Configuration error: Server \"{0}\" not found")]
    ServerNotFound(String),

    /// `connect` without a name against an empty registry
    #[error("Configuration error: No MCP servers configured. Add one first.")]
    NoServersConfigured,

    /// `connect` without a name while no entry is the default
    #[error("Configuration error: No default MCP server set. Pass a server name or set a default.")]
    NoDefaultServer,

    /// `add` with a name that is already registered
    #[error("Configuration error: Server \"{0}\" already exists")]
    ServerExists(String),

    /// Any failure while connecting to a server
    #[error("Connection error ({server}): {message}")]
    Connection {
        /// Name of the server the connection was attempted against
        server: String,
        /// Description of the underlying cause
        message: String,
    },

    /// Writing the server registry to disk failed
    #[error("Persistence error: failed to write {}: {message}", path.display())]
    Persistence {
        /// File that could not be written
        path: PathBuf,
        /// Description of the underlying cause
        message: String,
    },

    /// Malformed server entry or import document
    #[error("Validation error: {0}")]
    Validation(String),

    /// A server operation was refused because the server is connected
    #[error("Server \"{0}\" is in use: disconnect before removing it")]
    ServerInUse(String),

    /// Low-level transport failure (spawn, pipe, HTTP status)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// A JSON-RPC request did not receive a response in time
    #[error("MCP timeout: server={server}, method={method}")]
    McpTimeout {
        /// Server the request was sent to
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// The peer answered with a JSON-RPC error object
    #[error("MCP error: {0}")]
    Mcp(String),

    /// The peer selected a protocol revision this client does not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Versions this client accepts
        expected: Vec<String>,
        /// Version the server selected
        got: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl KotaError {
    /// Corrective command to suggest alongside the error, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use kota::error::KotaError;
    ///
    /// let err = KotaError::ServerInUse("dev".into());
    /// assert_eq!(err.hint(), Some("kota mcp disconnect"));
    /// ```
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            KotaError::NoServersConfigured => Some("kota mcp add <name> <stdio|http> [options]"),
            KotaError::ServerExists(_) => Some("kota mcp remove <name>"),
            KotaError::Configuration(_)
            | KotaError::ServerNotFound(_)
            | KotaError::NoDefaultServer => Some("kota mcp list"),
            KotaError::ServerInUse(_) => Some("kota mcp disconnect"),
            KotaError::Connection { .. } => Some("kota mcp status"),
            KotaError::Validation(_) => Some("kota mcp add --help"),
            _ => None,
        }
    }
}

/// Result type alias for KOTA operations
///
/// Uses `anyhow::Error` so that [`KotaError`] values can carry extra
/// context; callers that need the kind use `downcast_ref::<KotaError>()`.
pub type Result<T> = anyhow::Result<T>;

/// Returns the [`KotaError`] inside an `anyhow::Error`, if there is one.
pub fn kind_of(err: &anyhow::Error) -> Option<&KotaError> {
    err.downcast_ref::<KotaError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = KotaError::Configuration("Server \"missing\" not found".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: Server \"missing\" not found"
        );
    }

    #[test]
    fn test_connection_error_names_server() {
        let error = KotaError::Connection {
            server: "dev".to_string(),
            message: "handshake timed out".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("dev"));
        assert!(s.contains("handshake timed out"));
    }

    #[test]
    fn test_persistence_error_names_path() {
        let error = KotaError::Persistence {
            path: PathBuf::from("/tmp/kota/mcp-config.json"),
            message: "permission denied".to_string(),
        };
        assert!(error.to_string().contains("/tmp/kota/mcp-config.json"));
    }

    #[test]
    fn test_server_in_use_display() {
        let error = KotaError::ServerInUse("s1".to_string());
        assert!(error.to_string().contains("in use"));
        assert!(error.to_string().contains("s1"));
    }

    #[test]
    fn test_timeout_display() {
        let error = KotaError::McpTimeout {
            server: "dev".to_string(),
            method: "initialize".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "MCP timeout: server=dev, method=initialize"
        );
    }

    #[test]
    fn test_hint_for_empty_registry_suggests_add() {
        let error = KotaError::NoServersConfigured;
        assert_eq!(
            error.to_string(),
            "Configuration error: No MCP servers configured. Add one first."
        );
        assert_eq!(
            error.hint(),
            Some("kota mcp add <name> <stdio|http> [options]")
        );
    }

    #[test]
    fn test_hint_for_missing_server_suggests_list() {
        let error = KotaError::ServerNotFound("x".to_string());
        assert_eq!(error.to_string(), "Configuration error: Server \"x\" not found");
        assert_eq!(error.hint(), Some("kota mcp list"));
        assert_eq!(KotaError::NoDefaultServer.hint(), Some("kota mcp list"));
    }

    #[test]
    fn test_hint_does_not_depend_on_message_text() {
        let error = KotaError::Configuration("Server \"x\" already exists".to_string());
        assert_eq!(error.hint(), Some("kota mcp list"));
        assert_eq!(
            KotaError::ServerExists("x".into()).hint(),
            Some("kota mcp remove <name>")
        );
    }

    #[test]
    fn test_transport_errors_have_no_hint() {
        assert!(KotaError::McpTransport("broken pipe".into()).hint().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: KotaError = io_error.into();
        assert!(matches!(error, KotaError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: KotaError = json_error.into();
        assert!(matches!(error, KotaError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: KotaError = yaml_error.into();
        assert!(matches!(error, KotaError::Yaml(_)));
    }

    #[test]
    fn test_kind_of_recovers_variant_through_anyhow() {
        let err: anyhow::Error = KotaError::Validation("bad".into()).into();
        assert!(matches!(kind_of(&err), Some(KotaError::Validation(_))));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KotaError>();
    }
}
