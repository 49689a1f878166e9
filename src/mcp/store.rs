//! Persistent registry of named MCP servers
//!
//! [`ServerConfigStore`] owns the JSON registry file
//! (`<home>/.kota-ai/mcp-config.json` by default) and an in-memory mirror of
//! it. Every mutation is written through to disk immediately.
//!
//! # File format
//!
//! ```json
//! {
//!   "servers": [ { "name": "dev", "transportType": "stdio", "connection": { "command": "srv" }, "isDefault": true } ],
//!   "defaultServer": "dev"
//! }
//! ```
//!
//! # Invariants
//!
//! - Names are unique; adding an existing name replaces the entry.
//! - At most one entry has `isDefault = true`.
//! - The first entry added to an empty store becomes the default.
//! - Removing the default promotes the first remaining entry.
//!
//! Loading never fails: a missing or unreadable file yields an empty store
//! and invalid entries are skipped with a warning. Saving does fail, loudly,
//! and a failed save rolls the in-memory state back to what is on disk.
//!
//! There is no cross-process locking: two `kota` processes saving at the same
//! time can overwrite each other's changes. Writes are atomic (temp file +
//! rename), so the file itself is never left truncated.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KotaError, Result};
use crate::mcp::server::ServerConfig;

/// On-disk shape of the registry file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryFile<T> {
    #[serde(default = "Vec::new")]
    servers: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_server: Option<String>,
}

/// Registry of named server configurations backed by a JSON file.
#[derive(Debug, Clone)]
pub struct ServerConfigStore {
    path: PathBuf,
    servers: Vec<ServerConfig>,
}

impl ServerConfigStore {
    /// Load the registry at `path`.
    ///
    /// A file that is missing or cannot be parsed yields an empty store; the
    /// problem is logged at `warn`. Individual entries that fail validation
    /// are skipped. The `defaultServer` field and per-entry
    /// `isDefault` flags are reconciled so that at most one default remains.
    ///
    /// # Examples
    ///
    /// ```
    /// use kota::mcp::store::ServerConfigStore;
    ///
    /// let store = ServerConfigStore::load("/nonexistent/mcp-config.json");
    /// assert!(store.list().is_empty());
    /// ```
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let servers = match fs::read_to_string(&path) {
            Ok(raw) => parse_registry(&path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no MCP registry at {}; starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("failed to read MCP registry {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Self { path, servers }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full registry to disk, creating the parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Persistence`] if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let document = RegistryFile {
            servers: self.servers.iter().collect::<Vec<_>>(),
            default_server: self.get_default().map(|s| s.name.clone()),
        };
        let body = serde_json::to_string_pretty(&document).map_err(|e| self.persistence(e))?;
        write_atomically(&self.path, body.as_bytes()).map_err(|e| self.persistence(e))?;
        tracing::debug!(
            "saved {} MCP server(s) to {}",
            self.servers.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Add `config`, replacing any entry with the same name, and persist.
    ///
    /// No field-level merge happens on replace. If the replaced entry was the
    /// default the replacement stays default; if `config.is_default` is set
    /// every other entry loses the flag.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::Validation`] for a malformed entry and
    /// [`KotaError::Persistence`] if saving fails (the store is unchanged).
    pub fn add_or_replace(&mut self, config: ServerConfig) -> Result<()> {
        config.validate()?;
        self.mutate(|servers| insert(servers, config))
    }

    /// Apply several [`add_or_replace`](Self::add_or_replace) operations and
    /// persist once.
    ///
    /// Every entry is validated before anything changes.
    pub fn extend(&mut self, configs: impl IntoIterator<Item = ServerConfig>) -> Result<()> {
        let configs: Vec<ServerConfig> = configs.into_iter().collect();
        for config in &configs {
            config.validate()?;
        }
        self.mutate(|servers| {
            for config in configs {
                insert(servers, config);
            }
        })
    }

    /// Remove the named entry and persist.
    ///
    /// Returns `Ok(false)` without touching disk when no entry matches. If
    /// the removed entry was the default, the first remaining entry becomes
    /// the default.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let Some(index) = self.position(name) else {
            return Ok(false);
        };
        self.mutate(|servers| {
            let removed = servers.remove(index);
            if removed.is_default {
                if let Some(first) = servers.first_mut() {
                    first.is_default = true;
                }
            }
            true
        })
    }

    /// Make `name` the only default entry and persist.
    ///
    /// Returns `Ok(false)` when no entry matches.
    pub fn set_default(&mut self, name: &str) -> Result<bool> {
        if self.position(name).is_none() {
            return Ok(false);
        }
        self.mutate(|servers| {
            for server in servers.iter_mut() {
                server.is_default = server.name == name;
            }
            true
        })
    }

    /// Stamp `last_used` on the named entry and persist.
    ///
    /// Returns `Ok(false)` when no entry matches.
    pub fn touch_last_used(&mut self, name: &str, at: DateTime<Utc>) -> Result<bool> {
        let Some(index) = self.position(name) else {
            return Ok(false);
        };
        self.mutate(|servers| {
            servers[index].last_used = Some(at);
            true
        })
    }

    /// Entry with the given name (exact, case-sensitive match).
    pub fn get_by_name(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Whether an entry with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// The default entry, if any.
    pub fn get_default(&self) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.is_default)
    }

    /// All entries in insertion order.
    pub fn list(&self) -> &[ServerConfig] {
        &self.servers
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.servers.iter().position(|s| s.name == name)
    }

    fn mutate<R>(&mut self, f: impl FnOnce(&mut Vec<ServerConfig>) -> R) -> Result<R> {
        let snapshot = self.servers.clone();
        let out = f(&mut self.servers);
        if let Err(e) = self.save() {
            self.servers = snapshot;
            return Err(e);
        }
        Ok(out)
    }

    fn persistence(&self, e: impl std::fmt::Display) -> anyhow::Error {
        KotaError::Persistence {
            path: self.path.clone(),
            message: e.to_string(),
        }
        .into()
    }
}

/// Insert-or-replace without persisting; keeps the default invariants.
fn insert(servers: &mut Vec<ServerConfig>, mut config: ServerConfig) {
    match servers.iter().position(|s| s.name == config.name) {
        Some(index) => {
            config.is_default |= servers[index].is_default;
            servers[index] = config.clone();
        }
        None => {
            config.is_default |= servers.is_empty();
            servers.push(config.clone());
        }
    }
    if config.is_default {
        for server in servers.iter_mut() {
            server.is_default = server.name == config.name;
        }
    }
}

fn parse_registry(path: &Path, raw: &str) -> Vec<ServerConfig> {
    let document: RegistryFile<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("failed to parse MCP registry {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut servers: Vec<ServerConfig> = Vec::with_capacity(document.servers.len());
    for entry in document.servers {
        match serde_json::from_value::<ServerConfig>(entry) {
            Ok(config) => match servers.iter().position(|s| s.name == config.name) {
                Some(index) => servers[index] = config,
                None => servers.push(config),
            },
            Err(e) => tracing::warn!("skipping invalid MCP server entry: {}", e),
        }
    }

    let preferred = document
        .default_server
        .filter(|name| servers.iter().any(|s| &s.name == name))
        .or_else(|| servers.iter().find(|s| s.is_default).map(|s| s.name.clone()));
    for server in servers.iter_mut() {
        server.is_default = preferred.as_deref() == Some(server.name.as_str());
    }
    servers
}

/// Write `content` to a sibling temp file, sync it, then rename over `path`.
fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    {
        let mut file = fs::File::create(&temp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&temp, path)
}
