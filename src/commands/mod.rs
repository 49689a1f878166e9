//! Command handlers for the CLI
//!
//! - `mcp`: server registry management and the MCP connection lifecycle

pub mod mcp;
