//! Stand-in for a driver whose plugin binary is missing.
//!
//! Lets commands such as `ls` show the host with an error instead of
//! failing outright. The original raw configuration is kept untouched so the
//! host can still be saved without losing data.

use super::{Driver, DriverOptions, McnFlag};
use async_trait::async_trait;
use machine_shared::State;
use machine_shared::errors::{MachineError, MachineResult};

pub const DRIVER_NAME: &str = "not-found";

#[derive(Debug, Clone)]
pub struct NotFoundDriver {
    /// Name of the driver the host record asked for.
    wanted: String,
    machine_name: String,
    raw: Vec<u8>,
}

impl NotFoundDriver {
    pub fn new(wanted: &str, machine_name: &str, raw: &[u8]) -> Self {
        Self {
            wanted: wanted.to_string(),
            machine_name: machine_name.to_string(),
            raw: raw.to_vec(),
        }
    }

    /// Name of the driver that could not be loaded.
    pub fn wanted(&self) -> &str {
        &self.wanted
    }

    fn unavailable(&self) -> MachineError {
        MachineError::Driver(format!(
            "Driver \"{}\" not found. Do you have the plugin binary accessible in your PATH?",
            self.wanted
        ))
    }
}

#[async_trait]
impl Driver for NotFoundDriver {
    async fn create(&mut self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn driver_name(&self) -> MachineResult<String> {
        Ok(DRIVER_NAME.to_string())
    }

    async fn get_create_flags(&self) -> MachineResult<Vec<McnFlag>> {
        Ok(Vec::new())
    }

    async fn get_ip(&self) -> MachineResult<String> {
        Err(self.unavailable())
    }

    async fn get_machine_name(&self) -> MachineResult<String> {
        Ok(self.machine_name.clone())
    }

    async fn get_ssh_hostname(&self) -> MachineResult<String> {
        Err(self.unavailable())
    }

    async fn get_ssh_key_path(&self) -> MachineResult<String> {
        Err(self.unavailable())
    }

    async fn get_ssh_port(&self) -> MachineResult<u16> {
        Err(self.unavailable())
    }

    async fn get_ssh_username(&self) -> MachineResult<String> {
        Err(self.unavailable())
    }

    async fn get_url(&self) -> MachineResult<String> {
        Err(self.unavailable())
    }

    async fn get_state(&self) -> MachineResult<State> {
        Err(self.unavailable())
    }

    async fn kill(&mut self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn pre_create_check(&self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn remove(&mut self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn restart(&mut self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn set_config_from_flags(&mut self, _flags: &dyn DriverOptions) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn start(&mut self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn stop(&mut self) -> MachineResult<()> {
        Err(self.unavailable())
    }

    async fn get_config_raw(&self) -> MachineResult<Vec<u8>> {
        Ok(self.raw.clone())
    }

    async fn set_config_raw(&mut self, raw: &[u8]) -> MachineResult<()> {
        self.raw = raw.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_not_found_and_keeps_raw() {
        let mut driver = NotFoundDriver::new("virtualbox", "dev", br#"{"CPU":2}"#);
        assert_eq!(driver.driver_name().await.unwrap(), "not-found");
        assert_eq!(driver.get_machine_name().await.unwrap(), "dev");
        assert_eq!(driver.get_config_raw().await.unwrap(), br#"{"CPU":2}"#);

        let err = driver.start().await.unwrap_err();
        assert!(err.to_string().contains("virtualbox"));
        assert!(driver.get_state().await.is_err());
    }
}
