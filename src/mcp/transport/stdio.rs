//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process and exchanges newline-delimited
//! JSON over its stdin/stdout. Stderr lines are forwarded to
//! [`Transport::receive_err`] as diagnostics.
//!
//! # Lifecycle
//!
//! [`StdioTransport::spawn`] starts three pipe tasks (stdin writer, stdout
//! reader, stderr reader) and a watcher task that owns the [`Child`]. The
//! watcher waits for whichever comes first:
//!
//! - the child exits by itself: the exit status is logged and the
//!   `on_exit` callback fires;
//! - [`Transport::close`] is called, or the transport is dropped: the child
//!   gets SIGTERM (Unix), then is killed if it is still running after the
//!   grace period.
//!
//! The child inherits the parent environment with the configured variables
//! layered on top.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{KotaError, Result};
use crate::mcp::transport::{ExitCallback, Transport};

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use kota::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "npx".into(),
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     HashMap::new(),
///     None,
///     Duration::from_secs(2),
///     Box::new(|| eprintln!("server exited")),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    program: String,
    pid: Option<u32>,
    /// `None` once closed; dropping the sender closes the child's stdin.
    stdin_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Asks the watcher to terminate the child; carries a completion signal.
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<oneshot::Sender<()>>>>,
}

enum WatchOutcome {
    Exited(std::io::Result<ExitStatus>),
    ShutdownRequested(Option<oneshot::Sender<()>>),
}

impl StdioTransport {
    /// Spawn a child process and wire up its pipes.
    ///
    /// # Arguments
    ///
    /// * `executable` - Program to run, resolved through `PATH`.
    /// * `args` - Command-line arguments.
    /// * `env` - Variables layered over the inherited environment; these win
    ///   on conflict.
    /// * `working_dir` - Optional working directory.
    /// * `shutdown_grace` - Time between SIGTERM and kill on close.
    /// * `on_exit` - Fired if the child exits without being closed.
    ///
    /// # Errors
    ///
    /// Returns [`KotaError::McpTransport`] if the process cannot be spawned
    /// or its pipes are unavailable.
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
        shutdown_grace: Duration,
        on_exit: ExitCallback,
    ) -> Result<Self> {
        let program = executable.display().to_string();

        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            KotaError::McpTransport(format!("failed to spawn MCP server `{}`: {}", program, e))
        })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KotaError::McpTransport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KotaError::McpTransport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KotaError::McpTransport("child stderr unavailable after spawn".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<oneshot::Sender<()>>();

        // stdin_rx -> child stdin. The pipe closes when this task ends.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // child stdout -> stdout_tx, one message per non-blank line.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        // child stderr -> stderr_tx.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        let watched = program.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => WatchOutcome::Exited(status),
                request = shutdown_rx => WatchOutcome::ShutdownRequested(request.ok()),
            };
            match outcome {
                WatchOutcome::Exited(status) => {
                    match status {
                        Ok(status) => tracing::info!("MCP server `{}` exited: {}", watched, status),
                        Err(e) => tracing::warn!("failed to wait on MCP server `{}`: {}", watched, e),
                    }
                    on_exit();
                }
                WatchOutcome::ShutdownRequested(done) => {
                    terminate(&mut child, shutdown_grace, &watched).await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(Self {
            program,
            pid,
            stdin_tx: std::sync::Mutex::new(Some(stdin_tx)),
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            shutdown_tx: std::sync::Mutex::new(Some(shutdown_tx)),
        })
    }

    /// OS process id of the child, if it was available at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// SIGTERM, wait up to `grace`, then kill.
async fn terminate(child: &mut Child, grace: Duration, program: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid comes from a child we spawned and have not reaped.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("MCP server `{}` stopped: {}", program, status),
        Ok(Err(e)) => tracing::warn!("failed to wait on MCP server `{}`: {}", program, e),
        Err(_) => {
            tracing::warn!(
                "MCP server `{}` ignored SIGTERM for {:?}; killing it",
                program,
                grace
            );
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill MCP server `{}`: {}", program, e);
            }
        }
    }
}

fn channel_stream(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        let item = guard.recv().await?;
        drop(guard);
        Some((item, rx))
    }))
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        let guard = self.stdin_tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or_else(|| {
            KotaError::McpTransport(format!("stdin of `{}` is closed", self.program))
        })?;
        tx.send(message).map_err(|e| {
            KotaError::McpTransport(format!("stdin channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stdout_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stderr_rx))
    }

    /// Close stdin, then SIGTERM, then kill after the grace period.
    async fn close(&self) -> Result<()> {
        drop(
            self.stdin_tx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(),
        );
        let shutdown = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(shutdown) = shutdown else {
            return Ok(());
        };

        let (done_tx, done_rx) = oneshot::channel();
        if shutdown.send(done_tx).is_ok() {
            // An Err here means the child had already exited on its own.
            let _ = done_rx.await;
        }
        Ok(())
    }
}
