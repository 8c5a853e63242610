//! Host record persistence.

mod filestore;

pub use filestore::Filestore;

use crate::host::Host;
use async_trait::async_trait;
use machine_shared::errors::MachineResult;
use std::path::PathBuf;

/// Durable storage of host records, keyed by lower-cased host name.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether a record directory exists for `name`.
    async fn exists(&self, name: &str) -> MachineResult<bool>;

    /// Names of all stored hosts. Entries are not validated.
    async fn list(&self) -> MachineResult<Vec<String>>;

    /// Load a host and reconstruct its driver.
    async fn load(&self, name: &str) -> MachineResult<Host>;

    /// Delete a host record. Removing an absent host succeeds.
    async fn remove(&self, name: &str) -> MachineResult<()>;

    /// Sync the driver configuration into `host` and persist it.
    async fn save(&self, host: &mut Host) -> MachineResult<()>;

    fn get_machines_dir(&self) -> PathBuf;
}
