//! Connection lifecycle for the MCP server registry
//!
//! [`ConnectionManager`] owns the [`ServerConfigStore`] and at most one live
//! connection. It is either disconnected or connected; "connecting" only
//! exists while [`ConnectionManager::connect`] is running.
//!
//! # Concurrency
//!
//! Every operation that changes state takes `&mut self`, so two calls can
//! never overlap on the same owner. A host that shares the manager between
//! tasks wraps it in `Arc<tokio::sync::Mutex<_>>`; a second `connect` then
//! queues behind the one in flight.
//!
//! The live connection sits behind an `Arc<std::sync::Mutex<_>>` that the
//! stdio exit observer also holds. Each connection attempt gets a new
//! generation number and the observer only clears the connection it was
//! created for.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::config::McpSettings;
use crate::error::{KotaError, Result};
use crate::mcp::protocol::{McpSession, ServerCapabilities};
use crate::mcp::server::ServerConfig;
use crate::mcp::store::ServerConfigStore;
use crate::mcp::transport::{DefaultTransportFactory, ExitCallback, TransportFactory};
use crate::mcp::types::Implementation;

/// Options the manager needs for every connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound on the `initialize` exchange.
    pub handshake_timeout: Duration,
    /// Identity sent as `clientInfo`.
    pub client_info: Implementation,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            client_info: Implementation {
                name: "kota".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

impl From<&McpSettings> for ConnectOptions {
    fn from(settings: &McpSettings) -> Self {
        Self {
            handshake_timeout: settings.handshake_timeout(),
            client_info: Implementation {
                name: settings.client_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

struct ActiveConnection {
    generation: u64,
    server: String,
    capabilities: ServerCapabilities,
    session: McpSession,
}

#[derive(Default)]
struct ConnectionState {
    /// Generation of the most recent connection attempt.
    generation: u64,
    /// The peer of attempt `generation` exited before the attempt finished.
    exited_early: bool,
    active: Option<ActiveConnection>,
}

type SharedState = Arc<Mutex<ConnectionState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Takes the live connection out of `state`.
///
/// With `Some(generation)` only that connection is taken.
fn take_connection(state: &SharedState, generation: Option<u64>) -> Option<ActiveConnection> {
    let mut guard = lock(state);
    let matches = match (&guard.active, generation) {
        (Some(active), Some(g)) => active.generation == g,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if matches {
        guard.active.take()
    } else {
        None
    }
}

/// Sends the shutdown signal for `active`, then publishes the disconnected
/// status. Shared by [`ConnectionManager::disconnect`] and the exit observer.
async fn clear_connection(
    active: ActiveConnection,
    state: SharedState,
    status: Arc<watch::Sender<bool>>,
) {
    active.session.shutdown().await;
    // A newer connection may have been published while this one shut down.
    let guard = lock(&state);
    if guard.active.is_none() {
        status.send_replace(false);
    }
}

/// The MCP connection registry and lifecycle state machine.
///
/// # Examples
///
/// ```no_run
/// use kota::mcp::manager::ConnectionManager;
/// use kota::mcp::server::ServerConfig;
/// use kota::mcp::store::ServerConfigStore;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let store = ServerConfigStore::load("/tmp/kota/mcp-config.json");
/// let mut manager = ConnectionManager::new(store);
/// manager.add_server(ServerConfig::stdio("echo", "my-mcp-server"))?;
/// let caps = manager.connect(None).await?;
/// println!("connected, protocol {}", caps.protocol_version);
/// manager.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    store: ServerConfigStore,
    factory: Arc<dyn TransportFactory>,
    options: ConnectOptions,
    state: SharedState,
    status: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registry", &self.store.path())
            .field("current_server", &self.current_server())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Manager with the production transports and default options.
    pub fn new(store: ServerConfigStore) -> Self {
        Self::with_factory(
            store,
            Arc::new(DefaultTransportFactory::default()),
            ConnectOptions::default(),
        )
    }

    /// Manager built from application settings.
    pub fn from_settings(store: ServerConfigStore, settings: &McpSettings) -> Self {
        let factory = DefaultTransportFactory {
            request_timeout: settings.request_timeout(),
            shutdown_grace: settings.shutdown_grace(),
        };
        Self::with_factory(store, Arc::new(factory), ConnectOptions::from(settings))
    }

    /// Manager with a custom transport factory.
    pub fn with_factory(
        store: ServerConfigStore,
        factory: Arc<dyn TransportFactory>,
        options: ConnectOptions,
    ) -> Self {
        let (status, _) = watch::channel(false);
        Self {
            store,
            factory,
            options,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            status: Arc::new(status),
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Connect to `name`, or to the default server when `name` is `None`.
    ///
    /// An existing connection is torn down first. `lastUsed` is stamped only
    /// after the handshake succeeds.
    ///
    /// # Errors
    ///
    /// - [`KotaError::ServerNotFound`], [`KotaError::NoServersConfigured`] or
    ///   [`KotaError::NoDefaultServer`] if the server cannot be resolved; no
    ///   connection is attempted.
    /// - [`KotaError::Connection`] if the transport cannot be created or the
    ///   handshake fails. Anything partially created is torn down first.
    pub async fn connect(&mut self, name: Option<&str>) -> Result<ServerCapabilities> {
        let config = self.resolve(name)?.clone();

        if self.is_connected() {
            self.disconnect().await;
        }

        let generation = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.exited_early = false;
            state.generation
        };
        tracing::info!(server = %config.name, transport = %config.transport_type(), "connecting");

        let transport = self
            .factory
            .create(&config, self.exit_observer(generation))
            .map_err(|e| connection_error(&config.name, e))?;
        let session = McpSession::start(&config.name, transport);

        let handshake = session
            .initialize(self.options.client_info.clone(), self.options.handshake_timeout)
            .await;
        let capabilities = match handshake {
            Ok(capabilities) => capabilities,
            Err(e) => {
                session.shutdown().await;
                tracing::info!(server = %config.name, "handshake failed: {:#}", e);
                return Err(connection_error(&config.name, e));
            }
        };

        let session = {
            let mut state = lock(&self.state);
            if state.exited_early || session.is_closed() {
                Some(session)
            } else {
                state.active = Some(ActiveConnection {
                    generation,
                    server: config.name.clone(),
                    capabilities: capabilities.clone(),
                    session,
                });
                self.status.send_replace(true);
                None
            }
        };
        if let Some(session) = session {
            session.shutdown().await;
            return Err(connection_error(
                &config.name,
                anyhow::anyhow!("server exited right after the handshake"),
            ));
        }

        tracing::info!(server = %config.name, "connected");

        if let Err(e) = self.store.touch_last_used(&config.name, Utc::now()) {
            tracing::warn!(server = %config.name, "could not record last use: {:#}", e);
        }

        Ok(capabilities)
    }

    /// Disconnect from the current server. A no-op when not connected.
    ///
    /// The shutdown signal goes out first; subscribers see `false` once it
    /// has been delivered. The connection is cleared even if shutdown fails,
    /// so this never fails.
    pub async fn disconnect(&mut self) {
        match take_connection(&self.state, None) {
            Some(active) => {
                tracing::info!(server = %active.server, "disconnecting");
                clear_connection(active, Arc::clone(&self.state), Arc::clone(&self.status))
                    .await;
            }
            None => tracing::debug!("disconnect requested while not connected"),
        }
    }

    fn exit_observer(&self, generation: u64) -> ExitCallback {
        let state = Arc::clone(&self.state);
        let status = Arc::clone(&self.status);
        Box::new(move || {
            {
                let mut guard = lock(&state);
                if guard.generation == generation && guard.active.is_none() {
                    guard.exited_early = true;
                }
            }
            if let Some(active) = take_connection(&state, Some(generation)) {
                tracing::info!(server = %active.server, "server went away; connection cleared");
                tokio::spawn(clear_connection(active, state, status));
            }
        })
    }

    // -----------------------------------------------------------------------
    // State queries
    // -----------------------------------------------------------------------

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    /// Name of the connected server.
    pub fn current_server(&self) -> Option<String> {
        lock(&self.state).active.as_ref().map(|a| a.server.clone())
    }

    /// Capabilities of the connected server.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        lock(&self.state)
            .active
            .as_ref()
            .map(|a| a.capabilities.clone())
    }

    /// Receiver that sees `true` while connected and `false` otherwise.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    // -----------------------------------------------------------------------
    // Registry operations
    // -----------------------------------------------------------------------

    /// The server registry.
    pub fn store(&self) -> &ServerConfigStore {
        &self.store
    }

    /// Mutable access to the registry, for bulk operations such as import.
    pub fn store_mut(&mut self) -> &mut ServerConfigStore {
        &mut self.store
    }

    /// Add or replace a server entry.
    ///
    /// # Errors
    ///
    /// Validation and persistence errors from the store.
    pub fn add_server(&mut self, config: ServerConfig) -> Result<()> {
        self.store.add_or_replace(config)
    }

    /// Remove a server entry. Returns `Ok(false)` when no entry matches.
    ///
    /// # Errors
    ///
    /// [`KotaError::ServerInUse`] when `name` is the connected server.
    pub fn remove_server(&mut self, name: &str) -> Result<bool> {
        if self.current_server().as_deref() == Some(name) {
            return Err(KotaError::ServerInUse(name.to_string()).into());
        }
        self.store.remove(name)
    }

    /// Make `name` the default server. Returns `Ok(false)` when no entry matches.
    pub fn set_default_server(&mut self, name: &str) -> Result<bool> {
        self.store.set_default(name)
    }

    fn resolve(&self, name: Option<&str>) -> Result<&ServerConfig> {
        match name {
            Some(name) => self
                .store
                .get_by_name(name)
                .ok_or_else(|| KotaError::ServerNotFound(name.to_string()).into()),
            None if self.store.list().is_empty() => Err(KotaError::NoServersConfigured.into()),
            None => self
                .store
                .get_default()
                .ok_or_else(|| KotaError::NoDefaultServer.into()),
        }
    }
}

fn connection_error(server: &str, cause: anyhow::Error) -> anyhow::Error {
    // Keep validation problems with the configuration as they are.
    if let Some(KotaError::Validation(_)) = cause.downcast_ref::<KotaError>() {
        return cause;
    }
    KotaError::Connection {
        server: server.to_string(),
        message: format!("{:#}", cause),
    }
    .into()
}
