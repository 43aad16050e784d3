// src/lock.rs

//! Exclusive ownership of a target root
//!
//! One transaction at a time may own a root and its database. The owner holds
//! a `RootLock` for the whole run; dropping it releases the lock on every
//! exit path, including unwinding.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 5;

#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// Take the lock at `path`, creating the file and its directory if needed
    ///
    /// Tries 5 times, sleeping 100ms, 200ms, 400ms and 800ms in between.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired root lock {}", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                    }
                }
            }
        }

        Err(Error::LockError(format!(
            "Could not lock {} after {} attempts; another transaction may be running: {}",
            path.display(),
            MAX_RETRIES,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release root lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/strata.lock");

        let held = RootLock::acquire(&path).unwrap();
        assert_eq!(held.path(), path.as_path());
        assert!(matches!(RootLock::acquire(&path), Err(Error::LockError(_))));

        drop(held);
        assert!(RootLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_released_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.lock");

        let guarded = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _lock = RootLock::acquire(&guarded).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(RootLock::acquire(&path).is_ok());
    }
}
