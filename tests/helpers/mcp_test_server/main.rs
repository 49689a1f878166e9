//! MCP test server binary for integration tests
//!
//! A minimal MCP server speaking newline-delimited JSON-RPC over
//! stdin/stdout. Integration tests spawn it through the stdio transport and
//! the `kota` binary.
//!
//! # Modes
//!
//! Selected with the `MCP_TEST_SERVER_MODE` environment variable:
//!
//! - `normal` (default) -- answers `initialize` with protocol `2025-11-25`,
//!   `tools` and `resources` capabilities and one supported model; answers
//!   `ping`; everything else gets `-32601`.
//! - `exit-before-init` -- exits with status 3 as soon as it starts.
//! - `malformed` -- answers `initialize` with a result lacking
//!   `protocolVersion`.
//! - `hang` -- reads requests and never answers.
//! - `exit-after-init` -- answers `initialize`, then exits once the
//!   `notifications/initialized` notification arrives.
//!
//! Every received method name is also written to stderr, which the stdio
//! transport logs at debug level.

use std::io::{self, BufRead, Write};

fn main() {
    let mode = std::env::var("MCP_TEST_SERVER_MODE").unwrap_or_else(|_| "normal".to_string());
    if mode == "exit-before-init" {
        eprintln!("mcp_test_server: exiting before initialize");
        std::process::exit(3);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                });
                write_line(&mut out, &response);
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        eprintln!("mcp_test_server: received {}", method);

        if method == "notifications/initialized" {
            if mode == "exit-after-init" {
                std::process::exit(0);
            }
            continue;
        }
        if mode == "hang" {
            continue;
        }

        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let response = match method {
            "initialize" if mode == "malformed" => make_result(
                &id,
                serde_json::json!({ "capabilities": {}, "serverInfo": { "name": "broken" } }),
            ),
            "initialize" => handle_initialize(&id, &request),
            "ping" => make_result(&id, serde_json::json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };
        write_line(&mut out, &response);
    }
}

/// Echo the client's name back in `instructions` so tests can check it.
fn handle_initialize(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let client = request
        .pointer("/params/clientInfo/name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    make_result(
        id,
        serde_json::json!({
            "protocolVersion": "2025-11-25",
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": {}
            },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" },
            "supportedModels": [ { "id": "test-model", "name": "Test Model" } ],
            "instructions": format!("hello {}", client)
        }),
    )
}

fn make_result(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn make_error(id: &serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

fn write_line(out: &mut impl Write, value: &serde_json::Value) {
    let _ = writeln!(out, "{}", value);
    let _ = out.flush();
}
