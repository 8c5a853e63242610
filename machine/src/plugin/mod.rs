//! Driver plugins.
//!
//! Every driver runs in its own process. External drivers are separate
//! executables; drivers compiled into docker-machine are served by
//! re-executing the docker-machine binary itself in plugin mode. Either way
//! the host only ever sees an [`rpc::RpcClientDriver`].

pub mod localbinary;
pub mod rpc;

use crate::drivers::not_found::NotFoundDriver;
use crate::drivers::{Driver, DriverRegistry};
use async_trait::async_trait;
use localbinary::LocalBinaryPlugin;
use machine_shared::errors::{MachineError, MachineResult};
use rpc::{RpcClientDriver, WeakRpcClientDriver};
use std::path::PathBuf;
use std::sync::Arc;

/// Process-level handle on a running plugin.
#[async_trait]
pub trait PluginProcess: Send + Sync {
    /// Loopback address of the plugin's RPC server.
    async fn address(&self) -> MachineResult<String>;

    /// Stop forwarding output and release the process.
    async fn close(&self) -> MachineResult<()>;

    /// Prefix used when forwarding the plugin's output.
    fn set_machine_name(&self, name: &str);
}

/// Produces configured drivers from a driver name and a raw configuration.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn new_driver(&self, driver_name: &str, raw: &[u8]) -> MachineResult<Box<dyn Driver>>;

    /// Release whatever the factory handed out.
    async fn close(&self) -> MachineResult<()> {
        Ok(())
    }
}

/// Best-effort machine name out of a raw driver configuration.
fn machine_name_from_raw(raw: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("MachineName")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Starts one plugin process per driver instance.
pub struct RpcClientDriverFactory {
    /// Drivers the host binary serves itself.
    core: DriverRegistry,
    host_binary: Option<PathBuf>,
    /// Adapters handed out. Dropped or closed ones are pruned on insert.
    open: parking_lot::Mutex<Vec<WeakRpcClientDriver>>,
}

impl RpcClientDriverFactory {
    pub fn new(core: DriverRegistry) -> Self {
        let host_binary = match std::env::current_exe() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot locate own executable, core drivers need plugin binaries");
                None
            }
        };
        Self {
            core,
            host_binary,
            open: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Serve core drivers from `binary` instead of the running executable.
    pub fn with_host_binary(mut self, binary: PathBuf) -> Self {
        self.host_binary = Some(binary);
        self
    }

    fn plugin_for(&self, driver_name: &str) -> MachineResult<LocalBinaryPlugin> {
        match &self.host_binary {
            Some(binary) if self.core.contains(driver_name) => {
                Ok(LocalBinaryPlugin::core(binary.clone(), driver_name))
            }
            _ => LocalBinaryPlugin::new(driver_name),
        }
    }

    /// Adapters handed out and not yet closed.
    pub fn open_count(&self) -> usize {
        self.open
            .lock()
            .iter()
            .filter_map(WeakRpcClientDriver::upgrade)
            .filter(|d| !d.is_closed())
            .count()
    }

    fn track(&self, driver: &RpcClientDriver) {
        let mut open = self.open.lock();
        open.retain(|d| d.upgrade().is_some_and(|d| !d.close_requested()));
        open.push(driver.downgrade());
    }
}

#[async_trait]
impl DriverFactory for RpcClientDriverFactory {
    async fn new_driver(&self, driver_name: &str, raw: &[u8]) -> MachineResult<Box<dyn Driver>> {
        let plugin = match self.plugin_for(driver_name) {
            Ok(plugin) => plugin,
            Err(e) if e.is_binary_not_found() => {
                tracing::warn!(driver = driver_name, "{}", e);
                return Ok(Box::new(NotFoundDriver::new(
                    driver_name,
                    &machine_name_from_raw(raw),
                    raw,
                )));
            }
            Err(e) => return Err(e),
        };

        let plugin: Arc<dyn PluginProcess> = plugin.launch();
        let driver = RpcClientDriver::new(plugin, raw).await?;
        self.track(&driver);
        Ok(Box::new(driver))
    }

    async fn close(&self) -> MachineResult<()> {
        let drivers = std::mem::take(&mut *self.open.lock());
        let mut first_err: Option<MachineError> = None;
        for driver in drivers.iter().filter_map(WeakRpcClientDriver::upgrade) {
            if let Err(e) = driver.close().await {
                tracing::debug!(error = %e, "Error closing driver plugin");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Builds drivers in-process from a registry. No plugin processes.
pub struct BuiltinDriverFactory {
    registry: DriverRegistry,
    store_path: String,
}

impl BuiltinDriverFactory {
    pub fn new(registry: DriverRegistry, store_path: &str) -> Self {
        Self {
            registry,
            store_path: store_path.to_string(),
        }
    }
}

#[async_trait]
impl DriverFactory for BuiltinDriverFactory {
    async fn new_driver(&self, driver_name: &str, raw: &[u8]) -> MachineResult<Box<dyn Driver>> {
        let machine_name = machine_name_from_raw(raw);
        let Some(mut driver) = self.registry.get(driver_name, &machine_name, &self.store_path) else {
            tracing::warn!(driver = driver_name, "Driver is not registered");
            return Ok(Box::new(NotFoundDriver::new(driver_name, &machine_name, raw)));
        };
        driver.set_config_raw(raw).await?;
        Ok(driver)
    }
}

/// Plugin-mode entry: serve the registered driver `driver_name` over RPC.
pub async fn serve_registered_driver(registry: &DriverRegistry, driver_name: &str) -> MachineResult<()> {
    let driver = registry.get(driver_name, "", "").ok_or_else(|| {
        MachineError::Plugin(format!("no driver named \"{}\" is compiled in", driver_name))
    })?;
    rpc::serve_driver(driver).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fakedriver::{self, FakeDriver};
    use machine_shared::State;

    #[test]
    fn test_machine_name_from_raw() {
        assert_eq!(machine_name_from_raw(br#"{"MachineName":"dev"}"#), "dev");
        assert_eq!(machine_name_from_raw(b"garbage"), "");
    }

    #[tokio::test]
    async fn test_builtin_factory_restores_config() {
        let mut registry = DriverRegistry::new();
        registry.register(fakedriver::DRIVER_NAME, FakeDriver::boxed);
        let factory = BuiltinDriverFactory::new(registry, "/store");

        let raw = FakeDriver::with_state("dev", State::Paused)
            .get_config_raw()
            .await
            .unwrap();
        let driver = factory.new_driver("fakedriver", &raw).await.unwrap();
        assert_eq!(driver.get_machine_name().await.unwrap(), "dev");
        assert_eq!(driver.get_state().await.unwrap(), State::Paused);
    }

    #[tokio::test]
    async fn test_missing_plugin_becomes_not_found_driver() {
        let factory = RpcClientDriverFactory::new(DriverRegistry::with_core_drivers());
        let raw = br#"{"MachineName":"ghost","Extra":1}"#;

        let driver = factory.new_driver("doesnotexist99", raw).await.unwrap();
        assert_eq!(driver.driver_name().await.unwrap(), "not-found");
        assert_eq!(driver.get_machine_name().await.unwrap(), "ghost");
        assert_eq!(driver.get_config_raw().await.unwrap(), raw.to_vec());
        assert!(driver.get_state().await.is_err());

        assert_eq!(factory.open_count(), 0);
        factory.close().await.unwrap();
    }

    /// Plugin double pointing at an in-process server.
    struct LoopbackPlugin(String);

    #[async_trait]
    impl PluginProcess for LoopbackPlugin {
        async fn address(&self) -> MachineResult<String> {
            Ok(self.0.clone())
        }

        async fn close(&self) -> MachineResult<()> {
            Ok(())
        }

        fn set_machine_name(&self, _name: &str) {}
    }

    async fn loopback_driver() -> RpcClientDriver {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = rpc::RpcServerDriver::new(FakeDriver::boxed("dev", ""));
        tokio::spawn(server.serve(listener, std::time::Duration::from_secs(10)));
        let raw = FakeDriver::new("dev", "").get_config_raw().await.unwrap();
        RpcClientDriver::new(Arc::new(LoopbackPlugin(addr)), &raw).await.unwrap()
    }

    #[tokio::test]
    async fn test_factory_releases_dropped_and_closed_drivers() {
        let factory = RpcClientDriverFactory::new(DriverRegistry::with_core_drivers());

        let kept = loopback_driver().await;
        let dropped = loopback_driver().await;
        let closed = loopback_driver().await;
        for driver in [&kept, &dropped, &closed] {
            factory.track(driver);
        }
        assert_eq!(factory.open_count(), 3);

        let weak = dropped.downgrade();
        drop(dropped);
        assert!(weak.upgrade().is_none());
        closed.close().await.unwrap();
        assert_eq!(factory.open_count(), 1);

        let newest = loopback_driver().await;
        factory.track(&newest);
        assert_eq!(factory.open.lock().len(), 2);

        factory.close().await.unwrap();
        assert!(kept.is_closed());
        assert!(newest.is_closed());
        assert_eq!(factory.open_count(), 0);
    }
}
