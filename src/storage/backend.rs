//! File backend
//!
//! Durable credential storage. Writers take the scoped file lock and replace
//! the file by writing a temporary file in the same directory and renaming it
//! over the target, so the credential file is never observed half written.
//! `load` does not take the lock; the atomic rename is enough for readers.

use log::{debug, info};
use std::collections::HashSet;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::AuthfileConfig;
use crate::error::StoreError;
use crate::storage::lock::FileLock;
use crate::storage::record::{CredentialRecord, StoreContents};
use crate::storage::validation::{cost_is_valid, username_is_valid};

/// Handle to a credential file on disk.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    permissions: u32,
    lock_timeout: Duration,
    #[cfg(test)]
    persist_delay: Duration,
}

impl FileBackend {
    /// Opens the credential file at `path`, creating it with `permissions` if missing.
    ///
    /// Access is validated under the file lock; fails with `LockTimeout` if the
    /// lock cannot be taken within `lock_timeout`.
    pub fn open(
        path: impl AsRef<Path>,
        permissions: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        Self::open_with(path.as_ref(), permissions, lock_timeout, true)
    }

    /// Opens an existing credential file; fails with `NotFound` if it is missing.
    pub fn open_existing(
        path: impl AsRef<Path>,
        permissions: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        Self::open_with(path.as_ref(), permissions, lock_timeout, false)
    }

    /// Opens (or creates) the credential file named by the configuration.
    pub fn from_config(config: &AuthfileConfig) -> Result<Self, StoreError> {
        Self::open(&config.path, config.permissions, config.lock_timeout())
    }

    fn open_with(
        path: &Path,
        permissions: u32,
        lock_timeout: Duration,
        create: bool,
    ) -> Result<Self, StoreError> {
        let backend = Self {
            path: path.to_path_buf(),
            permissions,
            lock_timeout,
            #[cfg(test)]
            persist_delay: Duration::ZERO,
        };

        if !create {
            // Checked before locking: the sidecar cannot be created in a missing directory.
            match fs::metadata(path) {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(path.to_path_buf()));
                }
                Err(e) => return Err(StoreError::Io(e)),
                Ok(_) => {}
            }
        }

        let _lock = backend.lock()?;
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                // Fail early if the file exists but cannot be read.
                fs::File::open(path)?;
                debug!("Opened credential file {}", path.display());
            }
            Ok(_) => {
                return Err(StoreError::Io(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} is not a regular file", path.display()),
                )));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !create {
                    return Err(StoreError::NotFound(path.to_path_buf()));
                }
                create_file(path, permissions, "")?;
                info!(
                    "Created credential file {} (mode {:o})",
                    path.display(),
                    permissions
                );
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Username predicate applied by every mutator before touching storage.
    pub fn username_is_valid(&self, name: &str) -> bool {
        username_is_valid(name)
    }

    /// Acquires the file lock with the configured timeout.
    pub fn lock(&self) -> Result<FileLock, StoreError> {
        FileLock::acquire(&self.path, self.lock_timeout)
    }

    /// Parses the credential file.
    pub fn load(&self) -> Result<StoreContents, StoreError> {
        let text = self.read_raw()?;
        let contents = StoreContents::parse(&text)?;
        debug!(
            "Loaded {} record(s) at cost {} from {}",
            contents.records.len(),
            contents.cost,
            self.path.display()
        );
        Ok(contents)
    }

    /// Replaces the whole file with `cost` and `records`.
    pub fn replace_all(&self, cost: u32, records: &[CredentialRecord]) -> Result<(), StoreError> {
        if !cost_is_valid(cost) {
            return Err(StoreError::InvalidCost(cost));
        }
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.username()) {
                return Err(StoreError::DuplicateUsername(record.username().to_string()));
            }
        }

        let text = StoreContents::render(cost, records);
        let _lock = self.lock()?;
        self.write_atomically(&text)?;
        info!(
            "Wrote {} record(s) at cost {} to {}",
            records.len(),
            cost,
            self.path.display()
        );
        Ok(())
    }

    /// Locked read-transform-replace over the raw file text.
    pub(crate) fn rewrite<F>(&self, transform: F) -> Result<(), StoreError>
    where
        F: FnOnce(&str) -> Result<String, StoreError>,
    {
        let _lock = self.lock()?;
        let current = self.read_raw()?;
        let updated = transform(&current)?;
        self.write_atomically(&updated)
    }

    fn read_raw(&self) -> Result<String, StoreError> {
        fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(self.path.clone()),
            ErrorKind::InvalidData => StoreError::CorruptFormat {
                line: 0,
                reason: "file is not valid UTF-8".into(),
            },
            _ => StoreError::Io(e),
        })
    }

    /// Writes `text` to a sibling temporary file and renames it over the target.
    /// The caller must hold the file lock.
    fn write_atomically(&self, text: &str) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::Builder::new()
            .prefix(".authfile-")
            .tempfile_in(dir)?;
        temp.write_all(text.as_bytes())?;
        temp.as_file().sync_all()?;

        let existing = match fs::metadata(&self.path) {
            Ok(meta) => Some(meta.permissions()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(StoreError::Io(e)),
        };
        if let Some(perms) = existing.or_else(|| mode_permissions(self.permissions)) {
            fs::set_permissions(temp.path(), perms)?;
        }

        #[cfg(test)]
        if !self.persist_delay.is_zero() {
            std::thread::sleep(self.persist_delay);
        }

        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_persist_delay(mut self, delay: Duration) -> Self {
        self.persist_delay = delay;
        self
    }
}

/// Exclusively creates `path` with `permissions` and writes `contents`.
pub(crate) fn create_file(path: &Path, permissions: u32, contents: &str) -> Result<(), StoreError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(permissions);
    }
    #[cfg(not(unix))]
    let _ = permissions;
    let mut file = options.open(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_path_buf()),
        _ => StoreError::Io(e),
    })?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn mode_permissions(mode: u32) -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn mode_permissions(_mode: u32) -> Option<Permissions> {
    None
}
