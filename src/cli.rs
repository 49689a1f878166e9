//! Command-line interface definition for KOTA
//!
//! This module defines the CLI structure using clap's derive API. Everything
//! lives under the `mcp` command group.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::mcp::server::TransportType;

/// KOTA - MCP server registry and connection manager
///
/// Register MCP servers and connect to them over stdio or HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "kota")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the settings file (default: ~/.kota-ai/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the MCP server registry (default: ~/.kota-ai/mcp-config.json)
    #[arg(long, global = true)]
    pub mcp_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for KOTA
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage MCP servers and the active connection
    Mcp {
        /// MCP subcommand
        #[command(subcommand)]
        command: McpCommand,
    },
}

/// MCP management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum McpCommand {
    /// Connect to a server (the default server when no name is given)
    Connect {
        /// Server name
        name: Option<String>,

        /// Stay connected until Ctrl-C or until the server goes away
        #[arg(short, long)]
        wait: bool,
    },

    /// Disconnect from the current server
    Disconnect,

    /// List configured servers
    List,

    /// Register a new server
    Add(AddArgs),

    /// Remove a server
    Remove {
        /// Server name
        name: String,
    },

    /// Make a server the default
    Default {
        /// Server name
        name: String,
    },

    /// Import servers from a JSON or YAML file
    Import {
        /// File to import (.json, .yml or .yaml)
        file: PathBuf,

        /// Replace servers that already exist
        #[arg(short, long)]
        force: bool,
    },

    /// Show the connection state
    Status,
}

/// Arguments of `kota mcp add`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct AddArgs {
    /// Server name (letters, digits, '-' and '_')
    pub name: String,

    /// Transport used to reach the server
    #[arg(value_enum)]
    pub transport: Option<TransportType>,

    /// Command to launch (stdio)
    #[arg(long)]
    pub command: Option<String>,

    /// Comma-separated command arguments (stdio)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Working directory for the command (stdio)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Environment variable for the command, KEY=VALUE (stdio, repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Endpoint URL (http)
    #[arg(long)]
    pub url: Option<String>,

    /// API key sent as a bearer token (http)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Extra request header, KEY=VALUE (http, repeatable)
    #[arg(long = "header", value_name = "KEY=VALUE")]
    pub headers: Vec<String>,

    /// Human-readable name
    #[arg(long)]
    pub display_name: Option<String>,

    /// Description
    #[arg(long)]
    pub desc: Option<String>,

    /// Make this the default server
    #[arg(long)]
    pub default: bool,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
