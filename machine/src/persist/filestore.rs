//! One directory per host under `<root>/machines`.
//!
//! ```text
//! <root>/machines/<name>/
//!     config.json        host record
//!     config.json.bak    original bytes of the last migrated record
//!     .lock              advisory lock held while the record is written
//! ```
//!
//! Writes go to a temporary file in the host directory that is renamed over
//! `config.json`, so a crash leaves either the old or the new record.

use crate::host::migrate::migrate_host;
use crate::host::{Host, HostDocument, validate_host_name};
use crate::plugin::DriverFactory;
use async_trait::async_trait;
use machine_shared::constants::store::{BACKUP_SUFFIX, CONFIG_FILE, LOCK_FILE, MACHINES_DIR};
use machine_shared::errors::{MachineError, MachineResult};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

use super::Store;

pub struct Filestore {
    path: PathBuf,
    factory: Arc<dyn DriverFactory>,
}

impl Filestore {
    pub fn new(path: impl Into<PathBuf>, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            path: path.into(),
            factory,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory of `name`. Rejects names that would not map to exactly one
    /// entry under the machines directory.
    fn host_dir(&self, name: &str) -> MachineResult<PathBuf> {
        if !validate_host_name(name) {
            return Err(MachineError::InvalidHostName(name.to_string()));
        }
        Ok(self.get_machines_dir().join(name.to_lowercase()))
    }

    async fn save_record(&self, host: &mut Host) -> MachineResult<()> {
        host.sync_raw_driver().await?;
        let doc = host.to_document()?;
        let data = serde_json::to_vec_pretty(&doc)?;
        let dir = self.host_dir(&host.name)?;

        blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| {
                MachineError::Storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
            let _lock = lock_host_dir(&dir)?;
            let staged = stage_config(&dir, &data)?;
            commit_config(staged, &dir.join(CONFIG_FILE))
        })
        .await
    }

    /// Keep a backup of `original` and replace the record with `doc`.
    async fn write_migrated(&self, dir: PathBuf, original: Vec<u8>, doc: &HostDocument) -> MachineResult<()> {
        let data = serde_json::to_vec_pretty(doc)?;
        blocking(move || {
            let _lock = lock_host_dir(&dir)?;
            let config = dir.join(CONFIG_FILE);
            let backup = dir.join(format!("{}{}", CONFIG_FILE, BACKUP_SUFFIX));
            std::fs::write(&backup, &original).map_err(|e| {
                MachineError::Storage(format!("failed to write backup {}: {}", backup.display(), e))
            })?;
            let staged = stage_config(&dir, &data)?;
            commit_config(staged, &config)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> MachineResult<T>
where
    F: FnOnce() -> MachineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MachineError::Internal(format!("store task failed: {}", e)))?
}

/// Exclusive advisory lock on the host directory, released on drop.
fn lock_host_dir(dir: &Path) -> MachineResult<Flock<File>> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| MachineError::Storage(format!("failed to open {}: {}", path.display(), e)))?;
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
        MachineError::Storage(format!("failed to lock {}: {}", path.display(), errno))
    })
}

/// Write `data` to a temporary file next to the record.
fn stage_config(dir: &Path, data: &[u8]) -> MachineResult<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

fn commit_config(staged: NamedTempFile, target: &Path) -> MachineResult<()> {
    staged
        .persist(target)
        .map_err(|e| MachineError::Storage(format!("failed to replace {}: {}", target.display(), e)))?;
    Ok(())
}

#[async_trait]
impl Store for Filestore {
    async fn exists(&self, name: &str) -> MachineResult<bool> {
        match tokio::fs::metadata(self.host_dir(name)?).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> MachineResult<Vec<String>> {
        let dir = self.get_machines_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MachineError::Storage(format!(
                    "failed to read {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &str) -> MachineResult<Host> {
        let dir = self.host_dir(name)?;
        if !self.exists(name).await? {
            return Err(MachineError::HostDoesNotExist(name.to_string()));
        }

        let config = dir.join(CONFIG_FILE);
        let data = tokio::fs::read(&config).await.map_err(|e| {
            MachineError::Storage(format!("failed to read {}: {}", config.display(), e))
        })?;

        let store_path = self.path.to_string_lossy();
        let (doc, migrated) = migrate_host(name, &data, &store_path)?;
        if migrated {
            tracing::info!(machine = name, "Migrating host record to the current version");
            self.write_migrated(dir, data, &doc).await?;
        }

        let driver = self
            .factory
            .new_driver(&doc.driver_name, doc.driver.get().as_bytes())
            .await?;
        Ok(Host::from_document(doc, driver))
    }

    async fn remove(&self, name: &str) -> MachineResult<()> {
        let dir = self.host_dir(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MachineError::Storage(format!(
                "failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    async fn save(&self, host: &mut Host) -> MachineResult<()> {
        self.save_record(host).await.map_err(|e| MachineError::Save {
            name: host.name.clone(),
            source: Box::new(e),
        })
    }

    fn get_machines_dir(&self) -> PathBuf {
        self.path.join(MACHINES_DIR)
    }
}
