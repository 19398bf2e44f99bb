// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Mutual exclusion between concurrent invocations.
//!
//! Two runs against the same device would race on the key store mount and on
//! the header's slot state. [`OperationLock`] holds an exclusive, non-blocking
//! `flock` on a lock file for the whole operation. The kernel drops the lock
//! when the process exits, so a crash never leaves a stale lock behind.

use crate::error::{Result, SealKeyError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Default lock file location.
pub const DEFAULT_LOCK_PATH: &str = "/run/tesseract-sealkey.lock";

/// Exclusive advisory lock held until dropped
#[derive(Debug)]
pub struct OperationLock {
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Take the lock at `path`, failing immediately if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;

        try_lock_exclusive(&file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                SealKeyError::Locked(path.to_path_buf())
            } else {
                SealKeyError::Io(e)
            }
        })?;

        tracing::debug!(path = %path.display(), "operation lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = unlock(&self.file);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and valid for this call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and valid for this call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
