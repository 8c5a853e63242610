//! Driver interface and registry.
//!
//! A [`Driver`] is one way of provisioning and controlling a machine: a cloud
//! API, a hypervisor, or an already running engine. The host process never
//! talks to a concrete driver directly; it talks to an RPC proxy that
//! implements the same trait (see [`crate::plugin`]).
//!
//! ## Configuration
//!
//! Drivers own their configuration. The only way it crosses a process
//! boundary is the raw JSON blob returned by [`Driver::get_config_raw`], so a
//! driver's serialized fields are its wire schema.

mod base;
pub mod fakedriver;
mod flags;
pub mod none;
pub mod not_found;
mod registry;

pub use base::BaseDriver;
pub use flags::{DriverOptions, FlagValue, McnFlag, RpcFlags};
pub use registry::{DriverConstructor, DriverRegistry};

use async_trait::async_trait;
use machine_shared::errors::{MachineError, MachineResult};
use machine_shared::State;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Capability contract every backend implements.
///
/// Mutating operations take `&mut self`; the RPC server keeps its driver
/// behind a mutex, so calls into one driver never overlap.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Create the machine.
    async fn create(&mut self) -> MachineResult<()>;

    /// Name of the driver, as used by `--driver`.
    async fn driver_name(&self) -> MachineResult<String>;

    /// Driver specific flags accepted by `create`.
    async fn get_create_flags(&self) -> MachineResult<Vec<McnFlag>>;

    async fn get_ip(&self) -> MachineResult<String>;

    async fn get_machine_name(&self) -> MachineResult<String>;

    async fn get_ssh_hostname(&self) -> MachineResult<String>;

    async fn get_ssh_key_path(&self) -> MachineResult<String>;

    async fn get_ssh_port(&self) -> MachineResult<u16>;

    async fn get_ssh_username(&self) -> MachineResult<String>;

    /// URL of the container engine, e.g. `tcp://10.0.0.5:2376`.
    async fn get_url(&self) -> MachineResult<String>;

    async fn get_state(&self) -> MachineResult<State>;

    /// Forcefully stop the machine.
    async fn kill(&mut self) -> MachineResult<()>;

    /// Validate preconditions before `create` touches anything remote.
    async fn pre_create_check(&self) -> MachineResult<()>;

    /// Delete the machine and its backing resources.
    async fn remove(&mut self) -> MachineResult<()>;

    async fn restart(&mut self) -> MachineResult<()>;

    /// Configure the driver from flags parsed by the CLI.
    async fn set_config_from_flags(&mut self, flags: &dyn DriverOptions) -> MachineResult<()>;

    async fn start(&mut self) -> MachineResult<()>;

    async fn stop(&mut self) -> MachineResult<()>;

    /// Serialize the driver configuration to a JSON document.
    async fn get_config_raw(&self) -> MachineResult<Vec<u8>>;

    /// Replace the driver configuration from a JSON document.
    async fn set_config_raw(&mut self, raw: &[u8]) -> MachineResult<()>;
}

/// Serialize a driver's configuration to its raw form.
pub fn config_to_raw<T: Serialize>(config: &T) -> MachineResult<Vec<u8>> {
    Ok(serde_json::to_vec(config)?)
}

/// Parse a raw configuration produced by [`config_to_raw`].
pub fn config_from_raw<T: DeserializeOwned>(raw: &[u8]) -> MachineResult<T> {
    serde_json::from_slice(raw).map_err(|e| {
        MachineError::Config(format!("failed to parse driver configuration: {}", e))
    })
}

/// Check whether the driver currently reports `desired`.
///
/// A failing `get_state` counts as "not in state" so callers can keep
/// polling through transient errors.
pub async fn machine_in_state(driver: &dyn Driver, desired: State) -> bool {
    match driver.get_state().await {
        Ok(current) => current == desired,
        Err(e) => {
            tracing::debug!(error = %e, "error getting machine state");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakedriver::FakeDriver;
    use super::*;

    #[tokio::test]
    async fn test_machine_in_state() {
        let driver = FakeDriver::with_state("dev", State::Stopped);
        assert!(machine_in_state(&driver, State::Stopped).await);
        assert!(!machine_in_state(&driver, State::Running).await);
    }

    #[test]
    fn test_config_from_raw_rejects_garbage() {
        let err = config_from_raw::<BaseDriver>(b"not json").unwrap_err();
        assert!(matches!(err, MachineError::Config(_)));
    }
}
