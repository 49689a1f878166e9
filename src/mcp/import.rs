//! Bulk import of server entries from JSON or YAML files
//!
//! The whole document is schema-checked before anything is written: one bad
//! entry aborts the import and the registry stays untouched. Entries that
//! pass the check are then merged into the store and persisted in a single
//! save.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;

use crate::error::{KotaError, Result};
use crate::mcp::server::{validate_server_name, ServerConfig};
use crate::mcp::store::ServerConfigStore;

/// Options for [`import_from`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Replace entries whose name already exists instead of skipping them.
    pub overwrite: bool,
}

/// What happened to one entry of an import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Added under a new name
    Imported,
    /// Replaced an existing entry
    Overwritten,
    /// Left out, with the reason
    Skipped(String),
}

/// Per-entry record, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub name: String,
    pub outcome: ImportOutcome,
}

/// Result of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Entries added under a new name
    pub imported: usize,
    /// Entries that replaced an existing one
    pub overwritten: usize,
    /// Entries left out
    pub skipped: usize,
    pub entries: Vec<ImportEntry>,
}

impl ImportSummary {
    /// New plus overwritten entries.
    pub fn total_written(&self) -> usize {
        self.imported + self.overwritten
    }

    fn record(&mut self, name: &str, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Imported => self.imported += 1,
            ImportOutcome::Overwritten => self.overwritten += 1,
            ImportOutcome::Skipped(_) => self.skipped += 1,
        }
        self.entries.push(ImportEntry {
            name: name.to_string(),
            outcome,
        });
    }
}

/// Import server entries from `path` into `store`.
///
/// # Errors
///
/// - [`KotaError::Configuration`] if the file does not exist.
/// - [`KotaError::Validation`] for an unsupported extension, a parse error,
///   or the first entry that fails the schema check. Nothing is written.
/// - [`KotaError::Persistence`] if the final save fails.
///
/// # Examples
///
/// ```no_run
/// use kota::mcp::import::{import_from, ImportOptions};
/// use kota::mcp::store::ServerConfigStore;
///
/// let mut store = ServerConfigStore::load("/tmp/kota/mcp-config.json");
/// let summary = import_from(&mut store, "servers.yaml".as_ref(), ImportOptions::default())?;
/// println!("{} imported, {} skipped", summary.total_written(), summary.skipped);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn import_from(
    store: &mut ServerConfigStore,
    path: &Path,
    options: ImportOptions,
) -> Result<ImportSummary> {
    let document = read_document(path)?;
    validate_document(&document)?;

    let mut summary = ImportSummary::default();
    let mut accepted = Vec::new();
    let mut seen = HashSet::new();

    // validate_document guarantees `servers` is an array of objects with names
    let entries = document["servers"].as_array().cloned().unwrap_or_default();
    for entry in entries {
        let name = entry["name"].as_str().unwrap_or_default().to_string();

        let config: ServerConfig = match serde_json::from_value(entry) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(server = %name, "skipping import entry: {}", e);
                summary.record(&name, ImportOutcome::Skipped(e.to_string()));
                continue;
            }
        };

        let exists = store.contains(&name) || seen.contains(&name);
        if exists && !options.overwrite {
            tracing::debug!(server = %name, "skipping existing server");
            summary.record(&name, ImportOutcome::Skipped("already exists".to_string()));
            continue;
        }

        seen.insert(name.clone());
        accepted.push(config);
        let outcome = if exists {
            ImportOutcome::Overwritten
        } else {
            ImportOutcome::Imported
        };
        summary.record(&name, outcome);
    }

    if !accepted.is_empty() {
        store.extend(accepted)?;
    }
    tracing::info!(
        imported = summary.imported,
        overwritten = summary.overwritten,
        skipped = summary.skipped,
        "import from {} finished",
        path.display()
    );
    Ok(summary)
}

fn read_document(path: &Path) -> Result<Value> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !matches!(extension.as_str(), "json" | "yml" | "yaml") {
        return Err(KotaError::Validation(format!(
            "Unsupported import file format '{}': use .json, .yml or .yaml",
            path.display()
        ))
        .into());
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KotaError::Configuration(format!(
                "Import file not found: {}",
                path.display()
            ))
            .into());
        }
        Err(e) => return Err(e.into()),
    };

    let parsed = if extension == "json" {
        serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<Value>(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        KotaError::Validation(format!("Failed to parse {}: {}", path.display(), e)).into()
    })
}

/// Schema check over the whole document. Returns the first problem found.
pub fn validate_document(document: &Value) -> std::result::Result<(), KotaError> {
    let servers = document
        .get("servers")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            KotaError::Validation("Import file must contain a 'servers' array".to_string())
        })?;

    for (index, entry) in servers.iter().enumerate() {
        validate_entry(index, entry)?;
    }
    Ok(())
}

fn validate_entry(index: usize, entry: &Value) -> std::result::Result<(), KotaError> {
    let invalid = |msg: String| KotaError::Validation(format!("servers[{}]: {}", index, msg));

    let object = entry
        .as_object()
        .ok_or_else(|| invalid("entry must be an object".to_string()))?;

    let name = object
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing required 'name'".to_string()))?;
    validate_server_name(name).map_err(|e| invalid(strip_prefix(e)))?;

    let transport = object
        .get("transportType")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("Server '{}' is missing 'transportType'", name)))?;
    let required = match transport {
        "stdio" => "command",
        "http" => "url",
        other => {
            return Err(invalid(format!(
                "Server '{}' has invalid transportType '{}': expected stdio or http",
                name, other
            )))
        }
    };

    let connection = object
        .get("connection")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid(format!("Server '{}' is missing 'connection' object", name)))?;
    let present = connection
        .get(required)
        .and_then(Value::as_str)
        .is_some_and(|v| !v.trim().is_empty());
    if !present {
        return Err(invalid(format!(
            "Server '{}' with {} transport is missing required '{}' in connection",
            name, transport, required
        )));
    }
    Ok(())
}

fn strip_prefix(err: KotaError) -> String {
    match err {
        KotaError::Validation(msg) => msg,
        other => other.to_string(),
    }
}
