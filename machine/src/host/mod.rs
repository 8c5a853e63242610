//! Host records and the lifecycle orchestrator.
//!
//! A [`Host`] binds a machine name to a driver and that driver's opaque
//! configuration. Only the driver interprets `raw_driver`; the host and the
//! store carry it verbatim.

mod lifecycle;
pub mod migrate;
mod options;
mod probe;

pub use lifecycle::Provisioner;
pub use options::{AuthOptions, EngineOptions, HostOptions, SwarmOptions};
pub use probe::{EngineProbe, TcpEngineProbe, WaitPolicy, engine_address, wait_for};

use crate::drivers::Driver;
use machine_shared::constants::CONFIG_VERSION;
use machine_shared::errors::{MachineError, MachineResult};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;

/// Whether `name` may be used as a machine name.
///
/// Names start with an ASCII letter or digit, followed by letters, digits,
/// `.` or `-`.
pub fn validate_host_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// On-disk form of a host record.
#[derive(Debug, Serialize, Deserialize)]
pub struct HostDocument {
    #[serde(rename = "ConfigVersion", default)]
    pub config_version: i32,
    #[serde(rename = "Driver")]
    pub driver: Box<RawValue>,
    #[serde(rename = "DriverName")]
    pub driver_name: String,
    #[serde(rename = "HostOptions", default)]
    pub host_options: HostOptions,
    #[serde(rename = "Name")]
    pub name: String,
}

pub struct Host {
    pub config_version: i32,
    pub name: String,
    pub driver_name: String,
    pub host_options: HostOptions,
    /// Driver configuration as last synced from `driver`.
    pub raw_driver: Vec<u8>,
    pub driver: Box<dyn Driver>,
    wait: WaitPolicy,
    probe: Arc<dyn EngineProbe>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config_version", &self.config_version)
            .field("name", &self.name)
            .field("driver_name", &self.driver_name)
            .field("raw_driver", &String::from_utf8_lossy(&self.raw_driver))
            .finish_non_exhaustive()
    }
}

impl Host {
    pub fn new(
        name: &str,
        driver_name: &str,
        driver: Box<dyn Driver>,
        raw_driver: &[u8],
        host_options: HostOptions,
    ) -> Self {
        Self {
            config_version: CONFIG_VERSION,
            name: name.to_string(),
            driver_name: driver_name.to_string(),
            host_options,
            raw_driver: raw_driver.to_vec(),
            driver,
            wait: WaitPolicy::default(),
            probe: Arc::new(TcpEngineProbe),
        }
    }

    /// Rebuild a host from a stored document and its reconstructed driver.
    pub fn from_document(doc: HostDocument, driver: Box<dyn Driver>) -> Self {
        Self {
            config_version: doc.config_version,
            name: doc.name,
            driver_name: doc.driver_name,
            host_options: doc.host_options,
            raw_driver: doc.driver.get().as_bytes().to_vec(),
            driver,
            wait: WaitPolicy::default(),
            probe: Arc::new(TcpEngineProbe),
        }
    }

    pub fn to_document(&self) -> MachineResult<HostDocument> {
        let raw = if self.raw_driver.is_empty() {
            "{}".to_string()
        } else {
            String::from_utf8(self.raw_driver.clone()).map_err(|e| {
                MachineError::Config(format!("driver configuration is not UTF-8: {}", e))
            })?
        };
        let driver = RawValue::from_string(raw).map_err(|e| {
            MachineError::Config(format!("driver configuration is not valid JSON: {}", e))
        })?;
        Ok(HostDocument {
            config_version: self.config_version,
            driver,
            driver_name: self.driver_name.clone(),
            host_options: self.host_options.clone(),
            name: self.name.clone(),
        })
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait = policy;
        self
    }

    pub fn with_engine_probe(mut self, probe: Arc<dyn EngineProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait
    }

    /// Pull the driver's current configuration into `raw_driver`.
    pub async fn sync_raw_driver(&mut self) -> MachineResult<()> {
        self.raw_driver = self.driver.get_config_raw().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::none::NoneDriver;

    #[test]
    fn test_validate_host_name() {
        for ok in ["alpha", "a", "dev-1", "node.example", "0x"] {
            assert!(validate_host_name(ok), "{}", ok);
        }
        for bad in ["", "-dev", ".dev", "with space", "under_score", "slash/name", "ünï"] {
            assert!(!validate_host_name(bad), "{}", bad);
        }
    }

    #[test]
    fn test_document_keeps_raw_driver_verbatim() {
        let raw = br#"{"URL":"tcp://1.2.3.4:2376","MachineName":"alpha"}"#;
        let host = Host::new(
            "alpha",
            "none",
            NoneDriver::boxed("alpha", "/store"),
            raw,
            HostOptions::default(),
        );
        let doc = host.to_document().unwrap();
        assert_eq!(doc.config_version, CONFIG_VERSION);
        assert_eq!(doc.driver.get().as_bytes(), raw);

        let text = serde_json::to_string_pretty(&doc).unwrap();
        let parsed: HostDocument = serde_json::from_str(&text).unwrap();
        let restored = Host::from_document(parsed, NoneDriver::boxed("alpha", "/store"));
        assert_eq!(restored.raw_driver, raw.to_vec());
        assert_eq!(restored.driver_name, "none");
    }

    #[test]
    fn test_invalid_raw_driver_is_rejected() {
        let host = Host::new(
            "alpha",
            "none",
            NoneDriver::boxed("alpha", ""),
            b"{not json",
            HostOptions::default(),
        );
        assert!(matches!(host.to_document(), Err(MachineError::Config(_))));
    }
}
