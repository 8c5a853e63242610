//! Name to constructor map for drivers compiled into this binary.

use super::Driver;
use std::collections::BTreeMap;

/// Builds an unconfigured driver for `(machine_name, store_path)`.
pub type DriverConstructor = fn(&str, &str) -> Box<dyn Driver>;

/// Registry of drivers available in-process.
///
/// Constructed once at startup and passed by reference to whatever needs
/// it: the plugin factory (to decide which drivers the host binary serves
/// itself) and the plugin entry point (to pick the driver to serve).
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverConstructor>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the drivers shipped with docker-machine.
    pub fn with_core_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(super::none::DRIVER_NAME, super::none::NoneDriver::boxed);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &str, constructor: DriverConstructor) {
        if self.drivers.insert(name.to_string(), constructor).is_some() {
            tracing::debug!(driver = name, "replacing registered driver");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Instantiate the driver registered under `name`.
    pub fn get(&self, name: &str, machine_name: &str, store_path: &str) -> Option<Box<dyn Driver>> {
        self.drivers
            .get(name)
            .map(|constructor| constructor(machine_name, store_path))
    }

    pub fn names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fakedriver::FakeDriver;

    #[tokio::test]
    async fn test_core_registry() {
        let registry = DriverRegistry::with_core_drivers();
        assert!(registry.contains("none"));
        assert!(!registry.contains("virtualbox"));

        let driver = registry.get("none", "dev", "/store").unwrap();
        assert_eq!(driver.driver_name().await.unwrap(), "none");
        assert_eq!(driver.get_machine_name().await.unwrap(), "dev");
    }

    #[tokio::test]
    async fn test_registries_are_independent() {
        let mut registry = DriverRegistry::new();
        registry.register("fake", FakeDriver::boxed);

        assert_eq!(registry.names(), vec!["fake".to_string()]);
        assert!(!DriverRegistry::with_core_drivers().contains("fake"));
        assert!(registry.get("none", "dev", "/store").is_none());
    }
}
