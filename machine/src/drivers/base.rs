//! Fields every driver carries.

use machine_shared::errors::{MachineError, MachineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_SSH_USER: &str = "docker";
const DEFAULT_SSH_PORT: u16 = 22;

/// Common driver state, embedded (flattened) into concrete drivers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseDriver {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    pub machine_name: String,
    #[serde(rename = "SSHUser")]
    pub ssh_user: String,
    #[serde(rename = "SSHPort")]
    pub ssh_port: u16,
    #[serde(rename = "SSHKeyPath")]
    pub ssh_key_path: String,
    pub store_path: String,
    pub swarm_master: bool,
    pub swarm_host: String,
    pub swarm_discovery: String,
}

impl BaseDriver {
    pub fn new(machine_name: &str, store_path: &str) -> Self {
        Self {
            machine_name: machine_name.to_string(),
            store_path: store_path.to_string(),
            ..Default::default()
        }
    }

    pub fn get_machine_name(&self) -> String {
        self.machine_name.clone()
    }

    pub fn get_ip(&self) -> MachineResult<String> {
        if self.ip_address.is_empty() {
            return Err(MachineError::Driver("IP address is not set".into()));
        }
        Ok(self.ip_address.clone())
    }

    /// Key path, defaulting to `id_rsa` in the machine directory.
    pub fn get_ssh_key_path(&self) -> String {
        if self.ssh_key_path.is_empty() {
            return self.resolve_store_path("id_rsa").display().to_string();
        }
        self.ssh_key_path.clone()
    }

    pub fn get_ssh_port(&self) -> u16 {
        if self.ssh_port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.ssh_port
        }
    }

    pub fn get_ssh_username(&self) -> String {
        if self.ssh_user.is_empty() {
            DEFAULT_SSH_USER.to_string()
        } else {
            self.ssh_user.clone()
        }
    }

    /// Path of `file` inside this machine's store directory.
    pub fn resolve_store_path(&self, file: &str) -> PathBuf {
        PathBuf::from(&self.store_path)
            .join(machine_shared::constants::store::MACHINES_DIR)
            .join(&self.machine_name)
            .join(file)
    }
}
