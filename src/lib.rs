//! KOTA - MCP server registry and connection manager
//!
//! This library keeps a persistent registry of MCP (Model Context Protocol)
//! servers and manages a single connection to one of them over stdio or HTTP.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: Server registry, transports, handshake and connection manager
//! - `commands`: Handlers behind the `kota mcp` subcommands
//! - `config`: Settings loading and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use kota::mcp::{ConnectionManager, ServerConfigStore};
//! use kota::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let store = ServerConfigStore::load(config.mcp.registry_path()?);
//!     let mut manager = ConnectionManager::from_settings(store, &config.mcp);
//!     let capabilities = manager.connect(None).await?;
//!     println!("{:?}", capabilities.supported_features);
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{KotaError, Result};
