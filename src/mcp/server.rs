//! Named MCP server descriptors
//!
//! A [`ServerConfig`] is one persisted entry of the server registry. The
//! connection payload is a [`ServerConnection`] sum type, so a stdio entry
//! can never carry a URL and an HTTP entry can never carry a command.
//!
//! On the wire (registry file and import files) the payload is spelled as a
//! `transportType` discriminator next to a `connection` object:
//!
//! ```json
//! {
//!   "name": "filesystem",
//!   "transportType": "stdio",
//!   "connection": { "command": "npx", "args": ["-y", "server-filesystem"] },
//!   "isDefault": true
//! }
//! ```
//!
//! Serde goes through a private mirror struct so that every deserialized
//! entry is validated (name format, required fields, no cross-transport
//! fields) before a `ServerConfig` value exists.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KotaError;

/// Pattern every server name must match.
pub const SERVER_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+$";

fn name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SERVER_NAME_PATTERN).ok()).as_ref()
}

/// Check that `name` is a valid registry key.
///
/// # Errors
///
/// Returns [`KotaError::Validation`] when the name is empty or contains
/// characters other than ASCII letters, digits, `-` and `_`.
///
/// # Examples
///
/// ```
/// use kota::mcp::server::validate_server_name;
///
/// assert!(validate_server_name("local-fs_2").is_ok());
/// assert!(validate_server_name("no spaces").is_err());
/// ```
pub fn validate_server_name(name: &str) -> Result<(), KotaError> {
    if name_regex().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(KotaError::Validation(format!(
            "Server '{}' has invalid name format. Names must only contain letters, numbers, hyphens, and underscores",
            name
        )))
    }
}

/// Transport used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Spawned child process speaking newline-delimited JSON on stdin/stdout
    Stdio,
    /// Remote Streamable HTTP / SSE endpoint
    Http,
}

impl TransportType {
    /// Wire spelling of the transport type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Http => "http",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to launch a stdio server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdioConnection {
    /// Executable to spawn
    pub command: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Variables layered over the parent environment
    pub env: BTreeMap<String, String>,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
}

/// How to reach an HTTP server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpConnection {
    /// MCP endpoint URL
    pub url: String,
    /// Sent as `Authorization: Bearer <api_key>` when present
    pub api_key: Option<String>,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

/// Connection payload, keyed by transport type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerConnection {
    /// Child-process server
    Stdio(StdioConnection),
    /// Remote HTTP server
    Http(HttpConnection),
}

impl ServerConnection {
    /// The transport this payload belongs to.
    pub fn transport_type(&self) -> TransportType {
        match self {
            ServerConnection::Stdio(_) => TransportType::Stdio,
            ServerConnection::Http(_) => TransportType::Http,
        }
    }
}

/// A named, persisted description of one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig", into = "RawServerConfig")]
pub struct ServerConfig {
    /// Unique registry key
    pub name: String,
    /// Human-readable name
    pub display_name: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Transport-specific connection details
    pub connection: ServerConnection,
    /// Whether this entry is used when no server name is given
    pub is_default: bool,
    /// Time of the last successful connect
    pub last_used: Option<DateTime<Utc>>,
}

impl ServerConfig {
    /// Create a stdio server entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use kota::mcp::server::{ServerConfig, TransportType};
    ///
    /// let cfg = ServerConfig::stdio("s1", "/bin/echo");
    /// assert_eq!(cfg.transport_type(), TransportType::Stdio);
    /// assert!(!cfg.is_default);
    /// ```
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            name,
            ServerConnection::Stdio(StdioConnection {
                command: command.into(),
                ..Default::default()
            }),
        )
    }

    /// Create an HTTP server entry.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            ServerConnection::Http(HttpConnection {
                url: url.into(),
                ..Default::default()
            }),
        )
    }

    /// Create an entry from an already-built connection payload.
    pub fn new(name: impl Into<String>, connection: ServerConnection) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            connection,
            is_default: false,
            last_used: None,
        }
    }

    /// Mark the entry as the default.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The transport this entry uses.
    pub fn transport_type(&self) -> TransportType {
        self.connection.transport_type()
    }

    /// Display name if set, otherwise the registry name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Validate name format and transport payload.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), KotaError> {
        validate_server_name(&self.name)?;
        match &self.connection {
            ServerConnection::Stdio(stdio) if stdio.command.trim().is_empty() => {
                Err(KotaError::Validation(format!(
                    "Server '{}' with stdio transport is missing required 'command' in connection",
                    self.name
                )))
            }
            ServerConnection::Http(http) if http.url.trim().is_empty() => {
                Err(KotaError::Validation(format!(
                    "Server '{}' with http transport is missing required 'url' in connection",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire representation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerConfig {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    transport_type: TransportType,
    connection: RawConnection,
    #[serde(default)]
    is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    headers: Option<BTreeMap<String, String>>,
}

fn reject_field(name: &str, transport: TransportType, field: &str) -> KotaError {
    KotaError::Validation(format!(
        "Server '{}' with {} transport must not set '{}' in connection",
        name, transport, field
    ))
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = KotaError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let RawServerConfig {
            name,
            display_name,
            description,
            transport_type,
            connection: c,
            is_default,
            last_used,
        } = raw;

        let connection = match transport_type {
            TransportType::Stdio => {
                for (present, field) in [
                    (c.url.is_some(), "url"),
                    (c.api_key.is_some(), "apiKey"),
                    (c.headers.is_some(), "headers"),
                ] {
                    if present {
                        return Err(reject_field(&name, transport_type, field));
                    }
                }
                ServerConnection::Stdio(StdioConnection {
                    command: c.command.unwrap_or_default(),
                    args: c.args.unwrap_or_default(),
                    env: c.env.unwrap_or_default(),
                    cwd: c.cwd,
                })
            }
            TransportType::Http => {
                for (present, field) in [
                    (c.command.is_some(), "command"),
                    (c.args.is_some(), "args"),
                    (c.env.is_some(), "env"),
                    (c.cwd.is_some(), "cwd"),
                ] {
                    if present {
                        return Err(reject_field(&name, transport_type, field));
                    }
                }
                ServerConnection::Http(HttpConnection {
                    url: c.url.unwrap_or_default(),
                    api_key: c.api_key,
                    headers: c.headers.unwrap_or_default(),
                })
            }
        };

        let config = ServerConfig {
            name,
            display_name,
            description,
            connection,
            is_default,
            last_used,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<ServerConfig> for RawServerConfig {
    fn from(config: ServerConfig) -> Self {
        let transport_type = config.transport_type();
        let connection = match config.connection {
            ServerConnection::Stdio(stdio) => RawConnection {
                command: Some(stdio.command),
                args: (!stdio.args.is_empty()).then_some(stdio.args),
                env: (!stdio.env.is_empty()).then_some(stdio.env),
                cwd: stdio.cwd,
                ..Default::default()
            },
            ServerConnection::Http(http) => RawConnection {
                url: Some(http.url),
                api_key: http.api_key,
                headers: (!http.headers.is_empty()).then_some(http.headers),
                ..Default::default()
            },
        };
        RawServerConfig {
            name: config.name,
            display_name: config.display_name,
            description: config.description,
            transport_type,
            connection,
            is_default: config.is_default,
            last_used: config.last_used,
        }
    }
}
