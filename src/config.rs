//! Configuration management for KOTA
//!
//! Settings come from an optional YAML file (`<home>/.kota-ai/config.yaml`
//! unless `--config` says otherwise), then environment variables, then CLI
//! flags. Every field has a default, so an empty or missing file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KotaError, Result};

/// Directory under the user's home that holds KOTA's files.
pub const KOTA_DIR_NAME: &str = ".kota-ai";

/// File name of the MCP server registry inside [`KOTA_DIR_NAME`].
pub const MCP_REGISTRY_FILE: &str = "mcp-config.json";

/// File name of the settings file inside [`KOTA_DIR_NAME`].
pub const SETTINGS_FILE: &str = "config.yaml";

/// Main configuration structure for KOTA
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// MCP client settings
    #[serde(default)]
    pub mcp: McpSettings,
}

/// MCP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSettings {
    /// Location of the server registry; `<home>/.kota-ai/mcp-config.json`
    /// when unset
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Upper bound on the `initialize` exchange, for every transport
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,

    /// Per-request timeout for HTTP servers
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Time a stdio server gets between SIGTERM and kill
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_millis: u64,

    /// `clientInfo.name` sent during the handshake
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    2000
}

fn default_client_name() -> String {
    "kota".to_string()
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            handshake_timeout_seconds: default_handshake_timeout(),
            request_timeout_seconds: default_request_timeout(),
            shutdown_grace_millis: default_shutdown_grace(),
            client_name: default_client_name(),
        }
    }
}

impl McpSettings {
    /// Path of the server registry file.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Configuration`] if no path is configured and the
    /// home directory cannot be determined.
    pub fn registry_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Ok(kota_home()?.join(MCP_REGISTRY_FILE)),
        }
    }

    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    /// HTTP request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }
}

/// `<home>/.kota-ai`
///
/// # Errors
///
/// Returns [`KotaError::Configuration`] when the home directory is unknown.
pub fn kota_home() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(KOTA_DIR_NAME))
        .ok_or_else(|| {
            KotaError::Configuration("could not determine the home directory".to_string()).into()
        })
}

impl Config {
    /// Load configuration with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `cli` - Parsed command line; `--config` selects the file and
    ///   `--mcp-config` overrides the registry path
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => kota_home()?.join(SETTINGS_FILE),
        };

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse a YAML settings file.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Configuration`] if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KotaError::Configuration(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| {
            KotaError::Configuration(format!(
                "Failed to parse settings file {}: {}",
                path.display(),
                e
            ))
            .into()
        })
    }

    fn apply_env_vars(&mut self) {
        if let Ok(path) = std::env::var("KOTA_MCP_CONFIG") {
            if !path.is_empty() {
                self.mcp.config_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(timeout) = std::env::var("KOTA_MCP_HANDSHAKE_TIMEOUT") {
            if let Ok(value) = timeout.parse() {
                self.mcp.handshake_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid KOTA_MCP_HANDSHAKE_TIMEOUT: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("KOTA_MCP_REQUEST_TIMEOUT") {
            if let Ok(value) = timeout.parse() {
                self.mcp.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid KOTA_MCP_REQUEST_TIMEOUT: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.mcp_config {
            self.mcp.config_path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Configuration`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.mcp.handshake_timeout_seconds == 0 {
            return Err(KotaError::Configuration(
                "mcp.handshake_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.request_timeout_seconds == 0 {
            return Err(KotaError::Configuration(
                "mcp.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.client_name.trim().is_empty() {
            return Err(
                KotaError::Configuration("mcp.client_name cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }
}
