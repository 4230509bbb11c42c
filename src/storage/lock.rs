//! Scoped file lock
//!
//! Serializes writers of a credential file, across threads and processes,
//! with an OS advisory lock on the sidecar file `<file>.lock`. The sidecar
//! itself stays on disk; only the lock matters. The operating system drops
//! the lock when the holder exits, so a crashed process never leaves the
//! store locked. The credential file is not locked directly because writers
//! replace it by rename.

use log::debug;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::StoreError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Held lock on a credential file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    /// Acquires the lock for `target`, polling until `timeout` elapses.
    pub fn acquire(target: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let lock_path = lock_path_for(target);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        let deadline = Instant::now() + timeout;

        loop {
            match file.try_lock() {
                Ok(()) => {
                    debug!("Acquired lock {}", lock_path.display());
                    return Ok(Self { file, lock_path });
                }
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::LockTimeout {
                            path: target.to_path_buf(),
                            timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(TryLockError::Error(e)) => return Err(StoreError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well.
        if let Err(e) = self.file.unlock() {
            debug!("Failed to unlock {}: {}", self.lock_path.display(), e);
        } else {
            debug!("Released lock {}", self.lock_path.display());
        }
    }
}

/// Returns the sidecar lock path for a credential file.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
