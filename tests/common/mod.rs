use std::path::{Path, PathBuf};

use kota::mcp::server::{ServerConfig, ServerConnection, StdioConnection};

/// Path to the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` when running integration
/// tests; fall back to `target/debug` for manual runs.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Some(p) = option_env!("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("debug")
        .join("mcp_test_server")
}

/// A stdio entry that runs the test server in `mode`.
#[allow(dead_code)]
pub fn test_server_config(name: &str, mode: &str) -> ServerConfig {
    let mut env = std::collections::BTreeMap::new();
    env.insert("MCP_TEST_SERVER_MODE".to_string(), mode.to_string());
    ServerConfig::new(
        name,
        ServerConnection::Stdio(StdioConnection {
            command: test_server_exe().display().to_string(),
            args: Vec::new(),
            env,
            cwd: None,
        }),
    )
}

/// Registry path inside `dir`.
#[allow(dead_code)]
pub fn registry_path(dir: &Path) -> PathBuf {
    dir.join("mcp-config.json")
}
