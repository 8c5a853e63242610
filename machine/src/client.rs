//! Library entry point used by the CLI.
//!
//! [`LocalClient`] ties the driver factory to the host store: it builds new
//! hosts from a driver name and raw configuration, runs creation, and
//! loads, saves and removes records.

use crate::drivers::DriverRegistry;
use crate::host::{AuthOptions, EngineOptions, Host, HostOptions, SwarmOptions, validate_host_name};
use crate::options::MachineOptions;
use crate::persist::{Filestore, Store};
use crate::plugin::{DriverFactory, RpcClientDriverFactory};
use machine_shared::errors::{MachineError, MachineResult};
use machine_shared::constants::store::MACHINES_DIR;
use std::sync::Arc;

const DEFAULT_ENGINE_INSTALL_URL: &str = "https://get.docker.com";
const DEFAULT_SWARM_HOST: &str = "tcp://0.0.0.0:3376";
const DEFAULT_SWARM_IMAGE: &str = "swarm:latest";
const DEFAULT_SWARM_STRATEGY: &str = "spread";

pub struct LocalClient {
    store: Arc<dyn Store>,
    factory: Arc<dyn DriverFactory>,
    registry: DriverRegistry,
    options: MachineOptions,
}

impl LocalClient {
    /// Client backed by plugin processes and the on-disk store.
    pub fn new(options: MachineOptions, registry: DriverRegistry) -> Self {
        let factory: Arc<dyn DriverFactory> = Arc::new(RpcClientDriverFactory::new(registry.clone()));
        let store = Arc::new(Filestore::new(options.storage_path.clone(), Arc::clone(&factory)));
        Self::with_parts(options, registry, factory, store)
    }

    pub fn with_parts(
        options: MachineOptions,
        registry: DriverRegistry,
        factory: Arc<dyn DriverFactory>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            store,
            factory,
            registry,
            options,
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// Instantiate `driver_name` with `raw` and wrap it in a new host record.
    ///
    /// The host takes its name from the driver. Nothing is persisted.
    pub async fn new_host(&self, driver_name: &str, raw: &[u8]) -> MachineResult<Host> {
        let driver = self.factory.new_driver(driver_name, raw).await?;
        let name = driver.get_machine_name().await?;
        if !validate_host_name(&name) {
            return Err(MachineError::InvalidHostName(name));
        }

        let host_options = self.default_host_options(&name, driver_name);
        Ok(Host::new(&name, driver_name, driver, raw, host_options))
    }

    fn default_host_options(&self, name: &str, driver_name: &str) -> HostOptions {
        let certs = self.options.certs_dir();
        let machine_dir = self.options.storage_path.join(MACHINES_DIR).join(name.to_lowercase());
        let path = |p: std::path::PathBuf| p.to_string_lossy().into_owned();

        HostOptions {
            driver: driver_name.to_string(),
            auth_options: AuthOptions {
                cert_dir: path(certs.clone()),
                ca_cert_path: path(certs.join("ca.pem")),
                ca_private_key_path: path(certs.join("ca-key.pem")),
                client_cert_path: path(certs.join("cert.pem")),
                client_key_path: path(certs.join("key.pem")),
                server_cert_path: path(machine_dir.join("server.pem")),
                server_key_path: path(machine_dir.join("server-key.pem")),
                store_path: path(machine_dir),
                ..Default::default()
            },
            engine_options: EngineOptions {
                install_url: DEFAULT_ENGINE_INSTALL_URL.to_string(),
                tls_verify: true,
                ..Default::default()
            },
            swarm_options: SwarmOptions {
                host: DEFAULT_SWARM_HOST.to_string(),
                image: DEFAULT_SWARM_IMAGE.to_string(),
                strategy: DEFAULT_SWARM_STRATEGY.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Run pre-create checks, create the machine and persist the record.
    pub async fn create(&self, host: &mut Host) -> MachineResult<()> {
        if self.store.exists(&host.name).await? {
            return Err(MachineError::HostAlreadyExists(host.name.clone()));
        }

        tracing::info!("Running pre-create checks...");
        host.driver.pre_create_check().await?;
        self.store.save(host).await?;

        tracing::info!("Creating machine...");
        if let Err(e) = host.driver.create().await {
            tracing::error!(machine = %host.name, error = %e, "Error creating machine");
            return Err(e);
        }
        self.store.save(host).await?;
        tracing::info!(machine = %host.name, "Machine created");
        Ok(())
    }

    pub async fn load(&self, name: &str) -> MachineResult<Host> {
        self.store.load(name).await
    }

    pub async fn save(&self, host: &mut Host) -> MachineResult<()> {
        self.store.save(host).await
    }

    pub async fn list(&self) -> MachineResult<Vec<String>> {
        self.store.list().await
    }

    pub async fn exists(&self, name: &str) -> MachineResult<bool> {
        self.store.exists(name).await
    }

    /// Remove the machine and its record.
    ///
    /// With `force`, driver failures are logged and the record is removed
    /// anyway.
    pub async fn remove(&self, name: &str, force: bool) -> MachineResult<()> {
        if !validate_host_name(name) {
            return Err(MachineError::InvalidHostName(name.to_string()));
        }
        match self.store.load(name).await {
            Ok(mut host) => {
                if let Err(e) = host.remove().await {
                    if !force {
                        return Err(e);
                    }
                    tracing::warn!(machine = name, error = %e, "Error removing machine, removing record anyway");
                }
            }
            Err(e) if e.is_host_not_found() => return Err(e),
            Err(e) if force => {
                tracing::warn!(machine = name, error = %e, "Error loading machine, removing record anyway");
            }
            Err(e) => return Err(e),
        }
        self.store.remove(name).await?;
        tracing::info!("Successfully removed {}", name);
        Ok(())
    }

    /// Shut down every plugin this client started.
    pub async fn close(&self) -> MachineResult<()> {
        self.factory.close().await
    }
}
