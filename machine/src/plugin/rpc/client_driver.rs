//! Host side of the driver RPC: a [`Driver`] that forwards every method to
//! a plugin process.

use super::client::RpcClient;
use super::protocol::{Call, RawConfig};
use crate::drivers::{Driver, DriverOptions, McnFlag};
use crate::plugin::PluginProcess;
use async_trait::async_trait;
use machine_shared::State;
use machine_shared::constants::API_VERSION;
use machine_shared::constants::plugin::HEARTBEAT_INTERVAL;
use machine_shared::errors::{MachineError, MachineResult};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct Connection {
    plugin: Arc<dyn PluginProcess>,
    client: Arc<RpcClient>,
    heartbeat_done: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    heartbeat: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(
            addr = %self.client.addr(),
            "Driver plugin connection dropped without close"
        );
        // Without heartbeats the plugin server exits on its own deadline.
        if let Some(done) = self.heartbeat_done.get_mut().take() {
            let _ = done.send(());
        }
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
    }
}

/// RPC proxy for a driver running in a plugin process.
///
/// Clones share one connection; [`RpcClientDriver::close`] on any clone
/// closes it for all of them.
#[derive(Clone)]
pub struct RpcClientDriver {
    conn: Arc<Connection>,
}

impl RpcClientDriver {
    /// Connect to `plugin` and hand it the driver configuration.
    ///
    /// Heartbeats start before anything else is sent. A plugin speaking a
    /// different API version is closed again and reported as
    /// [`MachineError::IncompatibleVersion`].
    pub async fn new(plugin: Arc<dyn PluginProcess>, raw: &[u8]) -> MachineResult<Self> {
        Self::with_heartbeat_interval(plugin, raw, HEARTBEAT_INTERVAL).await
    }

    pub async fn with_heartbeat_interval(
        plugin: Arc<dyn PluginProcess>,
        raw: &[u8],
        interval: Duration,
    ) -> MachineResult<Self> {
        let client = match dial(plugin.as_ref()).await {
            Ok(c) => Arc::new(c),
            Err(e) => {
                if let Err(close_err) = plugin.close().await {
                    tracing::debug!(error = %close_err, "Error closing plugin");
                }
                return Err(e);
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&client), done_rx, interval));

        let driver = Self {
            conn: Arc::new(Connection {
                plugin,
                client,
                heartbeat_done: parking_lot::Mutex::new(Some(done_tx)),
                heartbeat: tokio::sync::Mutex::new(Some(heartbeat)),
                closed: AtomicBool::new(false),
            }),
        };

        if let Err(e) = driver.handshake(raw).await {
            if let Err(close_err) = driver.close().await {
                tracing::debug!(error = %close_err, "Error closing plugin after failed handshake");
            }
            return Err(e);
        }
        Ok(driver)
    }

    async fn handshake(&self, raw: &[u8]) -> MachineResult<()> {
        let version: i32 = self.conn.client.call_typed(Call::GetVersion).await?;
        if version != API_VERSION {
            return Err(MachineError::IncompatibleVersion {
                expected: API_VERSION,
                got: version,
            });
        }
        tracing::debug!(version, "Using API version");

        self.conn
            .client
            .call_unit(Call::SetConfigRaw(RawConfig(raw.to_vec())))
            .await?;

        let name = self.get_machine_name().await?;
        self.conn.plugin.set_machine_name(&name);
        Ok(())
    }

    /// Stop heartbeats, release the plugin process, then tell the server to
    /// exit. Idempotent.
    pub async fn close(&self) -> MachineResult<()> {
        if self.conn.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let done = self.conn.heartbeat_done.lock().take();
        if let Some(done) = done {
            let _ = done.send(());
        }
        if let Some(handle) = self.conn.heartbeat.lock().await.take() {
            let _ = handle.await;
        }

        if let Err(e) = self.conn.plugin.close().await {
            tracing::debug!(error = %e, "Error closing plugin process");
        }

        tracing::debug!("Making call to close driver server");
        let result = self.conn.client.call_unit(Call::Close).await;
        self.conn.client.close_connection().await;
        match result {
            Ok(()) => {
                tracing::debug!("Successfully made call to close driver server");
                Ok(())
            }
            // The server may already be gone after a failed heartbeat.
            Err(MachineError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Handle that does not keep the connection alive.
    pub fn downgrade(&self) -> WeakRpcClientDriver {
        WeakRpcClientDriver(Arc::downgrade(&self.conn))
    }

    /// Whether [`close`](Self::close) was called on any clone.
    pub fn close_requested(&self) -> bool {
        self.conn.closed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.closed.load(Ordering::SeqCst) || self.conn.client.is_closed()
    }

    /// Serialized driver configuration, fetched from the plugin.
    pub async fn marshal_json(&self) -> MachineResult<Vec<u8>> {
        self.get_config_raw().await
    }

    /// Replace the plugin's driver configuration.
    pub async fn unmarshal_json(&mut self, raw: &[u8]) -> MachineResult<()> {
        self.set_config_raw(raw).await
    }

    async fn rpc_string(&self, call: Call) -> MachineResult<String> {
        self.conn.client.call_typed(call).await
    }

    async fn rpc_unit(&self, call: Call) -> MachineResult<()> {
        self.conn.client.call_unit(call).await
    }
}

/// Non-owning reference to an [`RpcClientDriver`].
#[derive(Clone)]
pub struct WeakRpcClientDriver(Weak<Connection>);

impl WeakRpcClientDriver {
    /// The driver, unless every owning clone was dropped.
    pub fn upgrade(&self) -> Option<RpcClientDriver> {
        self.0.upgrade().map(|conn| RpcClientDriver { conn })
    }
}

async fn dial(plugin: &dyn PluginProcess) -> MachineResult<RpcClient> {
    let addr = plugin.address().await?;
    RpcClient::connect(&addr).await
}

async fn heartbeat_loop(
    client: Arc<RpcClient>,
    mut done: oneshot::Receiver<()>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut done => return,
            _ = ticker.tick() => {
                // A reply slower than one interval counts as a dead plugin.
                let failure = match tokio::time::timeout(interval, client.call_unit(Call::Heartbeat)).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("no reply within {:?}", interval),
                };
                tracing::warn!(
                    addr = %client.addr(),
                    error = %failure,
                    "Heartbeat to driver plugin failed, closing connection"
                );
                client.close_connection().await;
                return;
            }
        }
    }
}

#[async_trait]
impl Driver for RpcClientDriver {
    async fn create(&mut self) -> MachineResult<()> {
        self.rpc_unit(Call::Create).await
    }

    async fn driver_name(&self) -> MachineResult<String> {
        self.rpc_string(Call::DriverName).await
    }

    async fn get_create_flags(&self) -> MachineResult<Vec<McnFlag>> {
        self.conn.client.call_typed(Call::GetCreateFlags).await
    }

    async fn get_ip(&self) -> MachineResult<String> {
        self.rpc_string(Call::GetIp).await
    }

    async fn get_machine_name(&self) -> MachineResult<String> {
        self.rpc_string(Call::GetMachineName).await
    }

    async fn get_ssh_hostname(&self) -> MachineResult<String> {
        self.rpc_string(Call::GetSshHostname).await
    }

    async fn get_ssh_key_path(&self) -> MachineResult<String> {
        self.rpc_string(Call::GetSshKeyPath).await
    }

    async fn get_ssh_port(&self) -> MachineResult<u16> {
        self.conn.client.call_typed(Call::GetSshPort).await
    }

    async fn get_ssh_username(&self) -> MachineResult<String> {
        self.rpc_string(Call::GetSshUsername).await
    }

    async fn get_url(&self) -> MachineResult<String> {
        self.rpc_string(Call::GetUrl).await
    }

    async fn get_state(&self) -> MachineResult<State> {
        self.conn.client.call_typed(Call::GetState).await
    }

    async fn kill(&mut self) -> MachineResult<()> {
        self.rpc_unit(Call::Kill).await
    }

    async fn pre_create_check(&self) -> MachineResult<()> {
        self.rpc_unit(Call::PreCreateCheck).await
    }

    async fn remove(&mut self) -> MachineResult<()> {
        self.rpc_unit(Call::Remove).await
    }

    async fn restart(&mut self) -> MachineResult<()> {
        self.rpc_unit(Call::Restart).await
    }

    async fn set_config_from_flags(&mut self, flags: &dyn DriverOptions) -> MachineResult<()> {
        self.rpc_unit(Call::SetConfigFromFlags(flags.to_rpc_flags()))
            .await
    }

    async fn start(&mut self) -> MachineResult<()> {
        self.rpc_unit(Call::Start).await
    }

    async fn stop(&mut self) -> MachineResult<()> {
        self.rpc_unit(Call::Stop).await
    }

    async fn get_config_raw(&self) -> MachineResult<Vec<u8>> {
        let raw: RawConfig = self.conn.client.call_typed(Call::GetConfigRaw).await?;
        Ok(raw.0)
    }

    async fn set_config_raw(&mut self, raw: &[u8]) -> MachineResult<()> {
        self.rpc_unit(Call::SetConfigRaw(RawConfig(raw.to_vec())))
            .await
    }
}
