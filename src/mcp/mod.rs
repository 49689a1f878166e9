//! MCP (Model Context Protocol) client support for KOTA
//!
//! This module keeps a persistent registry of named MCP servers and manages
//! at most one live connection to one of them.
//!
//! The implementation targets protocol revision **2025-11-25** and accepts
//! the earlier revisions listed in [`types::SUPPORTED_PROTOCOL_VERSIONS`].
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC primitives and `initialize` wire types
//! - `server`    -- Named server descriptors (`ServerConfig`)
//! - `store`     -- JSON-backed server registry
//! - `client`    -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- `initialize` handshake and session lifetime
//! - `transport` -- `Transport` trait, factory and implementations (stdio,
//!   HTTP, fake)
//! - `manager`   -- Connect/disconnect state machine
//! - `import`    -- Bulk import from JSON or YAML files

pub mod client;
pub mod import;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use manager::ConnectionManager;
pub use protocol::ServerCapabilities;
pub use server::{ServerConfig, TransportType};
pub use store::ServerConfigStore;
