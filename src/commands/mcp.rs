//! MCP subcommand handlers
//!
//! This module implements `kota mcp <subcommand>`: registry management
//! (add, remove, default, import, list) and the connection lifecycle
//! (connect, disconnect, status). Results go to stdout. Failures are
//! returned to `main`, which prints them with a corrective hint.

use std::collections::BTreeMap;

use colored::Colorize;
use prettytable::{cell, row, Table};

use crate::cli::{AddArgs, McpCommand};
use crate::config::Config;
use crate::error::{KotaError, Result};
use crate::mcp::import::{import_from, ImportOptions, ImportOutcome, ImportSummary};
use crate::mcp::manager::ConnectionManager;
use crate::mcp::protocol::ServerCapabilities;
use crate::mcp::server::{
    validate_server_name, HttpConnection, ServerConfig, ServerConnection, StdioConnection,
    TransportType,
};
use crate::mcp::store::ServerConfigStore;

/// Handle MCP subcommands
///
/// Loads the registry named by `config`, builds a [`ConnectionManager`] and
/// dispatches `command` to it.
///
/// # Errors
///
/// Returns the error of the failing operation; see [`KotaError::hint`] for
/// the suggestion printed next to it.
///
/// # Examples
///
/// ```no_run
/// use kota::cli::McpCommand;
/// use kota::commands::mcp::handle_mcp;
/// use kota::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::default();
///     handle_mcp(McpCommand::List, &config).await
/// }
/// ```
pub async fn handle_mcp(command: McpCommand, config: &Config) -> Result<()> {
    let registry = config.mcp.registry_path()?;
    tracing::debug!("using MCP registry {}", registry.display());
    let store = ServerConfigStore::load(registry);
    let mut manager = ConnectionManager::from_settings(store, &config.mcp);
    run(command, &mut manager).await
}

/// Dispatch one subcommand against `manager`.
pub async fn run(command: McpCommand, manager: &mut ConnectionManager) -> Result<()> {
    match command {
        McpCommand::Connect { name, wait } => connect(manager, name.as_deref(), wait).await,
        McpCommand::Disconnect => {
            disconnect(manager).await;
            Ok(())
        }
        McpCommand::List => {
            list(manager);
            Ok(())
        }
        McpCommand::Add(args) => add(manager, args),
        McpCommand::Remove { name } => remove(manager, &name),
        McpCommand::Default { name } => set_default(manager, &name),
        McpCommand::Import { file, force } => {
            let summary = import_from(
                manager.store_mut(),
                &file,
                ImportOptions { overwrite: force },
            )?;
            print_import_summary(&summary);
            Ok(())
        }
        McpCommand::Status => {
            status(manager);
            Ok(())
        }
    }
}

async fn connect(manager: &mut ConnectionManager, name: Option<&str>, wait: bool) -> Result<()> {
    let capabilities = manager.connect(name).await?;
    let server = manager.current_server().unwrap_or_default();
    println!("{} Connected to {}", "✓".green(), server.bold());
    print_capabilities(&capabilities);

    if wait {
        let mut status = manager.subscribe();
        println!("\nPress Ctrl-C to disconnect.");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("failed to listen for Ctrl-C: {}", e);
                }
            }
            _ = status.wait_for(|connected| !connected) => {
                println!("{} Server {} went away", "!".yellow(), server);
            }
        }
    }

    // The connection does not outlive the process.
    manager.disconnect().await;
    if wait {
        println!("Disconnected from {}", server);
    }
    Ok(())
}

async fn disconnect(manager: &mut ConnectionManager) {
    match manager.current_server() {
        Some(server) => {
            manager.disconnect().await;
            println!("Disconnected from {}", server);
        }
        None => println!("Not connected."),
    }
}

fn list(manager: &ConnectionManager) {
    let servers = manager.store().list();
    if servers.is_empty() {
        println!("No MCP servers configured.");
        println!("\nAdd one with:");
        println!("  kota mcp add my-server stdio --command npx --args -y,@scope/server");
        return;
    }

    let current = manager.current_server();
    let mut table = Table::new();
    table.add_row(row!["", "Name", "Transport", "Target", "API Key", "Last Used"]);

    for server in servers {
        let mut marker = String::new();
        if current.as_deref() == Some(server.name.as_str()) {
            marker.push('●');
        }
        if server.is_default {
            marker.push('*');
        }
        let name = match &server.display_name {
            Some(display) => format!("{} ({})", server.name, display),
            None => server.name.clone(),
        };
        let api_key = match &server.connection {
            ServerConnection::Http(HttpConnection {
                api_key: Some(key), ..
            }) => mask_api_key(key),
            _ => "-".to_string(),
        };
        let last_used = server
            .last_used
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        table.add_row(row![
            marker,
            name,
            server.transport_type(),
            connection_target(&server.connection),
            api_key,
            last_used
        ]);
    }

    println!("\nConfigured MCP servers:\n");
    table.printstd();
    println!("\n* default   ● connected\n");
}

fn add(manager: &mut ConnectionManager, args: AddArgs) -> Result<()> {
    if manager.store().contains(&args.name) {
        return Err(KotaError::ServerExists(args.name).into());
    }

    let config = build_server_config(args)?;
    let name = config.name.clone();
    manager.add_server(config)?;

    let is_default = manager
        .store()
        .get_default()
        .is_some_and(|s| s.name == name);
    if is_default {
        println!("{} Added server {} (default)", "✓".green(), name.bold());
    } else {
        println!("{} Added server {}", "✓".green(), name.bold());
    }
    Ok(())
}

fn remove(manager: &mut ConnectionManager, name: &str) -> Result<()> {
    if !manager.remove_server(name)? {
        return Err(not_found(name));
    }
    println!("{} Removed server {}", "✓".green(), name.bold());
    if let Some(default) = manager.store().get_default() {
        tracing::debug!("default server is now {}", default.name);
    }
    Ok(())
}

fn set_default(manager: &mut ConnectionManager, name: &str) -> Result<()> {
    if !manager.set_default_server(name)? {
        return Err(not_found(name));
    }
    println!("{} {} is now the default server", "✓".green(), name.bold());
    Ok(())
}

fn status(manager: &ConnectionManager) {
    match (manager.current_server(), manager.server_capabilities()) {
        (Some(server), Some(capabilities)) => {
            println!("{} Connected to {}", "●".green(), server.bold());
            print_capabilities(&capabilities);
        }
        _ => {
            println!("{} Not connected", "○".dimmed());
            match manager.store().get_default() {
                Some(default) => println!(
                    "\nConnect to the default server ({}) with: kota mcp connect",
                    default.name
                ),
                None => println!("\nSee configured servers with: kota mcp list"),
            }
        }
    }
}

fn print_capabilities(capabilities: &ServerCapabilities) {
    println!("  Protocol:  {}", capabilities.protocol_version);
    if let Some(name) = &capabilities.server_name {
        match &capabilities.server_version {
            Some(version) => println!("  Server:    {} {}", name, version),
            None => println!("  Server:    {}", name),
        }
    }
    if capabilities.supported_features.is_empty() {
        println!("  Features:  none advertised");
    } else {
        println!("  Features:  {}", capabilities.supported_features.join(", "));
    }
    if !capabilities.supported_models.is_empty() {
        let models: Vec<&str> = capabilities
            .supported_models
            .iter()
            .map(|m| m.name.as_deref().unwrap_or(&m.id))
            .collect();
        println!("  Models:    {}", models.join(", "));
    }
}

fn print_import_summary(summary: &ImportSummary) {
    for entry in &summary.entries {
        match &entry.outcome {
            ImportOutcome::Imported => println!("  {} {}", "+".green(), entry.name),
            ImportOutcome::Overwritten => {
                println!("  {} {} (overwritten)", "~".yellow(), entry.name)
            }
            ImportOutcome::Skipped(reason) => {
                println!("  {} {} (skipped: {})", "-".dimmed(), entry.name, reason)
            }
        }
    }
    println!("{}", import_summary_line(summary));
}

/// `N servers imported (X new, Y overwritten), Z skipped.`
pub fn import_summary_line(summary: &ImportSummary) -> String {
    format!(
        "{} servers imported ({} new, {} overwritten), {} skipped.",
        summary.total_written(),
        summary.imported,
        summary.overwritten,
        summary.skipped
    )
}

/// Turn `kota mcp add` arguments into a validated [`ServerConfig`].
///
/// # Errors
///
/// Returns [`KotaError::Validation`] for a bad name, a missing transport or
/// required option, an option of the other transport, or a malformed
/// `KEY=VALUE` pair or URL.
pub fn build_server_config(args: AddArgs) -> Result<ServerConfig> {
    validate_server_name(&args.name)?;
    let transport = args.transport.ok_or_else(|| {
        KotaError::Validation(format!(
            "Missing transport for server '{}': expected stdio or http",
            args.name
        ))
    })?;

    let connection = match transport {
        TransportType::Stdio => {
            reject_options(
                transport,
                &[
                    ("--url", args.url.is_some()),
                    ("--api-key", args.api_key.is_some()),
                    ("--header", !args.headers.is_empty()),
                ],
            )?;
            let command = args.command.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
                KotaError::Validation(
                    "Missing required option --command for stdio transport".to_string(),
                )
            })?;
            ServerConnection::Stdio(StdioConnection {
                command,
                args: args.args,
                env: parse_pairs("--env", &args.env)?,
                cwd: args.cwd,
            })
        }
        TransportType::Http => {
            reject_options(
                transport,
                &[
                    ("--command", args.command.is_some()),
                    ("--args", !args.args.is_empty()),
                    ("--cwd", args.cwd.is_some()),
                    ("--env", !args.env.is_empty()),
                ],
            )?;
            let url = args.url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                KotaError::Validation("Missing required option --url for http transport".to_string())
            })?;
            url::Url::parse(&url)
                .map_err(|e| KotaError::Validation(format!("Invalid --url '{}': {}", url, e)))?;
            ServerConnection::Http(HttpConnection {
                url,
                api_key: args.api_key,
                headers: parse_pairs("--header", &args.headers)?,
            })
        }
    };

    let mut config = ServerConfig::new(args.name, connection);
    config.display_name = args.display_name;
    config.description = args.desc;
    config.is_default = args.default;
    config.validate()?;
    Ok(config)
}

fn reject_options(transport: TransportType, options: &[(&str, bool)]) -> Result<()> {
    match options.iter().find(|(_, present)| *present) {
        Some((flag, _)) => Err(KotaError::Validation(format!(
            "Option {} is not valid for {} transport",
            flag, transport
        ))
        .into()),
        None => Ok(()),
    }
}

/// Parse repeated `KEY=VALUE` options.
fn parse_pairs(flag: &str, pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(KotaError::Validation(format!(
                "Invalid {} value '{}': expected KEY=VALUE",
                flag, pair
            ))
            .into()),
        })
        .collect()
}

/// Show only the first three characters of a secret.
pub fn mask_api_key(key: &str) -> String {
    let prefix: String = key.chars().take(3).collect();
    format!("{}...", prefix)
}

fn connection_target(connection: &ServerConnection) -> String {
    match connection {
        ServerConnection::Stdio(stdio) if stdio.args.is_empty() => stdio.command.clone(),
        ServerConnection::Stdio(stdio) => format!("{} {}", stdio.command, stdio.args.join(" ")),
        ServerConnection::Http(http) => http.url.clone(),
    }
}

fn not_found(name: &str) -> anyhow::Error {
    KotaError::ServerNotFound(name.to_string()).into()
}
