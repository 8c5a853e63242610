//! Process-wide settings.

use machine_shared::constants::store::{CERTS_DIR, STORAGE_PATH_ENV};
use machine_shared::errors::{MachineError, MachineResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineOptions {
    /// Root of the store. Absolute.
    pub storage_path: PathBuf,
    pub debug: bool,
}

impl MachineOptions {
    pub fn new(storage_path: impl Into<PathBuf>) -> MachineResult<Self> {
        let storage_path = storage_path.into();
        if !storage_path.is_absolute() {
            return Err(MachineError::Config(format!(
                "storage path must be absolute, got {}",
                storage_path.display()
            )));
        }
        Ok(Self {
            storage_path,
            debug: false,
        })
    }

    /// Resolve the store root from an explicit value, then
    /// `MACHINE_STORAGE_PATH`, then `~/.docker/machine`.
    pub fn resolve(explicit: Option<PathBuf>) -> MachineResult<Self> {
        if let Some(path) = explicit {
            return Self::new(path);
        }
        if let Some(path) = std::env::var_os(STORAGE_PATH_ENV).filter(|p| !p.is_empty()) {
            return Self::new(PathBuf::from(path));
        }
        Self::new(default_storage_path()?)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.storage_path.join(CERTS_DIR)
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }
}

fn default_storage_path() -> MachineResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MachineError::Config("cannot determine home directory".to_string()))?;
    Ok(home.join(".docker").join("machine"))
}
