//! Driver for machines created outside docker-machine.
//!
//! The machine is described by the URL of its engine only; nothing can be
//! started, stopped or killed.

use super::{BaseDriver, Driver, DriverOptions, McnFlag, config_from_raw, config_to_raw};
use async_trait::async_trait;
use machine_shared::State;
use machine_shared::errors::{MachineError, MachineResult};
use serde::{Deserialize, Serialize};

pub const DRIVER_NAME: &str = "none";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoneDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(rename = "URL", default)]
    pub url: String,
}

impl NoneDriver {
    pub fn new(machine_name: &str, store_path: &str) -> Self {
        Self {
            base: BaseDriver::new(machine_name, store_path),
            url: String::new(),
        }
    }

    pub fn boxed(machine_name: &str, store_path: &str) -> Box<dyn Driver> {
        Box::new(Self::new(machine_name, store_path))
    }

    fn unsupported(action: &str) -> MachineError {
        MachineError::Driver(format!("hosts without a driver cannot be {}", action))
    }
}

#[async_trait]
impl Driver for NoneDriver {
    async fn create(&mut self) -> MachineResult<()> {
        Ok(())
    }

    async fn driver_name(&self) -> MachineResult<String> {
        Ok(DRIVER_NAME.to_string())
    }

    async fn get_create_flags(&self) -> MachineResult<Vec<McnFlag>> {
        Ok(vec![McnFlag::string(
            "url",
            "URL of host when no driver is selected",
            "",
        )])
    }

    async fn get_ip(&self) -> MachineResult<String> {
        self.base.get_ip()
    }

    async fn get_machine_name(&self) -> MachineResult<String> {
        Ok(self.base.get_machine_name())
    }

    async fn get_ssh_hostname(&self) -> MachineResult<String> {
        Ok(String::new())
    }

    async fn get_ssh_key_path(&self) -> MachineResult<String> {
        Ok(String::new())
    }

    async fn get_ssh_port(&self) -> MachineResult<u16> {
        Ok(0)
    }

    async fn get_ssh_username(&self) -> MachineResult<String> {
        Ok(String::new())
    }

    async fn get_url(&self) -> MachineResult<String> {
        Ok(self.url.clone())
    }

    async fn get_state(&self) -> MachineResult<State> {
        Ok(State::Running)
    }

    async fn kill(&mut self) -> MachineResult<()> {
        Err(Self::unsupported("killed"))
    }

    async fn pre_create_check(&self) -> MachineResult<()> {
        Ok(())
    }

    async fn remove(&mut self) -> MachineResult<()> {
        Ok(())
    }

    async fn restart(&mut self) -> MachineResult<()> {
        Err(Self::unsupported("restarted"))
    }

    async fn set_config_from_flags(&mut self, flags: &dyn DriverOptions) -> MachineResult<()> {
        let raw_url = flags.string("url");
        if raw_url.is_empty() {
            return Err(MachineError::InvalidFlag(
                "--url option is required when no driver is selected".into(),
            ));
        }

        let parsed = url::Url::parse(&raw_url)
            .map_err(|e| MachineError::InvalidFlag(format!("invalid --url {}: {}", raw_url, e)))?;
        self.base.ip_address = parsed.host_str().unwrap_or_default().to_string();
        self.url = raw_url;
        Ok(())
    }

    async fn start(&mut self) -> MachineResult<()> {
        Err(Self::unsupported("started"))
    }

    async fn stop(&mut self) -> MachineResult<()> {
        Err(Self::unsupported("stopped"))
    }

    async fn get_config_raw(&self) -> MachineResult<Vec<u8>> {
        config_to_raw(self)
    }

    async fn set_config_raw(&mut self, raw: &[u8]) -> MachineResult<()> {
        *self = config_from_raw(raw)?;
        Ok(())
    }
}
