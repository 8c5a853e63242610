//! Driver plugin process launcher.
//!
//! A plugin is an executable named `docker-machine-driver-<name>` found on
//! `PATH`, or the docker-machine binary itself for core drivers. The host
//! starts it with the plugin token in its environment and reads one line
//! from its stdout: the loopback address its RPC server listens on.
//! Everything the plugin prints afterwards is forwarded to the host log.
//!
//! ```text
//! LocalBinaryPlugin::launch()
//!     │
//!     ├─ serve task ── executor.start() ── stdout line 1 ──► address slot
//!     │                    │
//!     │                    ├─ stdout lines ──► info!("(machine) ...")
//!     │                    ├─ stderr lines ──► debug!("(machine) DBG | ...")
//!     │                    └─ stop signal  ──► executor.close()
//!     │
//!     └─ address() ── waits on the slot (ADDRESS_TIMEOUT), then cached
//! ```

use async_trait::async_trait;
use machine_shared::constants::plugin::{
    ADDRESS_TIMEOUT, BINARY_PREFIX, ENV_DRIVER_NAME, ENV_KEY, ENV_VAL,
};
use machine_shared::errors::{MachineError, MachineResult};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use super::PluginProcess;

/// Grace period for a closed plugin to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Line reader over one of the plugin's output streams.
pub type OutputLines = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// Process control for a plugin.
#[async_trait]
pub trait PluginExecutor: Send {
    /// Start the process and hand back its stdout and stderr.
    async fn start(&mut self) -> MachineResult<(OutputLines, OutputLines)>;

    /// Release the process.
    async fn close(&mut self) -> MachineResult<()>;
}

/// Runs a plugin binary as a child process.
pub struct LocalBinaryExecutor {
    binary_path: PathBuf,
    /// Set when the binary serves one of its built-in drivers.
    core_driver: Option<String>,
    child: Option<Child>,
}

impl LocalBinaryExecutor {
    pub fn new(binary_path: PathBuf, core_driver: Option<String>) -> Self {
        Self {
            binary_path,
            core_driver,
            child: None,
        }
    }
}

#[async_trait]
impl PluginExecutor for LocalBinaryExecutor {
    async fn start(&mut self) -> MachineResult<(OutputLines, OutputLines)> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.env(ENV_KEY, ENV_VAL);
        if let Some(driver) = &self.core_driver {
            cmd.env(ENV_DRIVER_NAME, driver);
        }

        // Pass RUST_LOG to the plugin so its stderr follows the host's level
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            let err_msg = format!(
                "Failed to start plugin binary at {}: {}",
                self.binary_path.display(),
                e
            );
            tracing::error!("{}", err_msg);
            MachineError::Plugin(err_msg)
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MachineError::Plugin("error getting plugin stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MachineError::Plugin("error getting plugin stderr pipe".into()))?;

        tracing::debug!(
            binary = %self.binary_path.display(),
            pid = ?child.id(),
            "Started plugin process"
        );
        self.child = Some(child);

        let stdout: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(BufReader::new(stdout));
        let stderr: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(BufReader::new(stderr));
        Ok((stdout.lines(), stderr.lines()))
    }

    async fn close(&mut self) -> MachineResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // The plugin exits once it receives the RPC Close that follows;
        // reap it in the background and kill it if it lingers.
        tokio::spawn(async move {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(?status, "Plugin process exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for plugin process"),
                Err(_) => {
                    tracing::warn!("Plugin process did not exit in time, killing it");
                    let _ = child.kill().await;
                }
            }
        });
        Ok(())
    }
}

enum AddressSlot {
    Pending(oneshot::Receiver<String>),
    Ready(String),
    Failed(String),
}

/// Parts consumed by the serve loop.
struct ServeParts {
    executor: Box<dyn PluginExecutor>,
    address_tx: oneshot::Sender<String>,
    stop_rx: oneshot::Receiver<()>,
}

/// One running driver plugin process.
pub struct LocalBinaryPlugin {
    driver_name: String,
    machine_name: RwLock<String>,
    address: Mutex<AddressSlot>,
    address_timeout: Duration,
    serve_parts: parking_lot::Mutex<Option<ServeParts>>,
    stop_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    serve_handle: Mutex<Option<JoinHandle<MachineResult<()>>>>,
}

impl LocalBinaryPlugin {
    /// Plugin for `driver_name`, resolved on the executable search path.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::DriverBinaryNotFound`] when no
    /// `docker-machine-driver-<name>` executable exists.
    pub fn new(driver_name: &str) -> MachineResult<Self> {
        let binary_name = format!("{}{}", BINARY_PREFIX, driver_name);
        let binary_path =
            which::which(&binary_name).map_err(|_| MachineError::DriverBinaryNotFound {
                driver: driver_name.to_string(),
            })?;

        tracing::debug!(driver = driver_name, binary = %binary_path.display(), "Found plugin binary");
        Ok(Self::with_executor(
            driver_name,
            Box::new(LocalBinaryExecutor::new(binary_path, None)),
        ))
    }

    /// Plugin for a core driver served by `binary` (normally the running
    /// docker-machine executable).
    pub fn core(binary: PathBuf, driver_name: &str) -> Self {
        Self::with_executor(
            driver_name,
            Box::new(LocalBinaryExecutor::new(
                binary,
                Some(driver_name.to_string()),
            )),
        )
    }

    pub fn with_executor(driver_name: &str, executor: Box<dyn PluginExecutor>) -> Self {
        let (address_tx, address_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        Self {
            driver_name: driver_name.to_string(),
            machine_name: RwLock::new(driver_name.to_string()),
            address: Mutex::new(AddressSlot::Pending(address_rx)),
            address_timeout: ADDRESS_TIMEOUT,
            serve_parts: parking_lot::Mutex::new(Some(ServeParts {
                executor,
                address_tx,
                stop_rx,
            })),
            stop_tx: parking_lot::Mutex::new(Some(stop_tx)),
            serve_handle: Mutex::new(None),
        }
    }

    pub fn with_address_timeout(mut self, timeout: Duration) -> Self {
        self.address_timeout = timeout;
        self
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Start serving on a background task.
    pub fn launch(self) -> Arc<Self> {
        let plugin = Arc::new(self);
        let handle = tokio::spawn({
            let plugin = Arc::clone(&plugin);
            async move {
                let result = plugin.serve().await;
                if let Err(e) = &result {
                    tracing::debug!(driver = %plugin.driver_name, error = %e, "Plugin serve loop failed");
                }
                result
            }
        });

        // Freshly created, nobody else can hold the lock yet.
        if let Ok(mut slot) = plugin.serve_handle.try_lock() {
            *slot = Some(handle);
        }
        plugin
    }

    /// Drive the plugin process until [`close`](Self::close) is called.
    ///
    /// Reads the address handshake, then forwards output lines to the log.
    pub async fn serve(&self) -> MachineResult<()> {
        let ServeParts {
            mut executor,
            address_tx,
            mut stop_rx,
        } = self
            .serve_parts
            .lock()
            .take()
            .ok_or_else(|| MachineError::Internal("plugin is already being served".into()))?;

        // Dropping address_tx on failure unblocks address() with an error.
        let (mut stdout, mut stderr) = executor.start().await?;

        let handshake = tokio::select! {
            line = stdout.next_line() => line,
            _ = &mut stop_rx => {
                return executor.close().await;
            }
        };

        match handshake {
            Ok(Some(line)) => {
                let addr = line.trim().to_string();
                tracing::debug!(driver = %self.driver_name, address = %addr, "Plugin server listening");
                let _ = address_tx.send(addr);
            }
            Ok(None) => {
                executor.close().await?;
                return Err(MachineError::Plugin(format!(
                    "plugin for driver {} exited before reporting its address",
                    self.driver_name
                )));
            }
            Err(e) => {
                executor.close().await?;
                return Err(MachineError::Plugin(format!(
                    "error reading address from plugin for driver {}: {}",
                    self.driver_name, e
                )));
            }
        }

        let mut stdout_open = true;
        let mut stderr_open = true;
        loop {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => tracing::info!("({}) {}", self.machine_name.read(), line),
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => tracing::debug!("({}) DBG | {}", self.machine_name.read(), line),
                    _ => stderr_open = false,
                },
                _ = &mut stop_rx => break,
            }
        }

        drop(stdout);
        drop(stderr);
        executor.close().await
    }
}

#[async_trait]
impl PluginProcess for LocalBinaryPlugin {
    async fn address(&self) -> MachineResult<String> {
        let mut slot = self.address.lock().await;
        match &mut *slot {
            AddressSlot::Ready(addr) => Ok(addr.clone()),
            AddressSlot::Failed(reason) => Err(MachineError::Plugin(reason.clone())),
            AddressSlot::Pending(rx) => match tokio::time::timeout(self.address_timeout, rx).await
            {
                Ok(Ok(addr)) => {
                    *slot = AddressSlot::Ready(addr.clone());
                    Ok(addr)
                }
                Ok(Err(_)) => {
                    let reason = format!(
                        "plugin for driver {} did not report an address",
                        self.driver_name
                    );
                    *slot = AddressSlot::Failed(reason.clone());
                    Err(MachineError::Plugin(reason))
                }
                Err(_) => Err(MachineError::AddressTimeout(self.address_timeout)),
            },
        }
    }

    async fn close(&self) -> MachineResult<()> {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }

        let handle = self.serve_handle.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(MachineError::Internal(format!(
                    "plugin serve task panicked: {}",
                    e
                ))),
            }
        } else {
            Ok(())
        }
    }

    fn set_machine_name(&self, name: &str) {
        *self.machine_name.write() = name.to_string();
    }
}
