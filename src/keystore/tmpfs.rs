// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! tmpfs-backed [`EphemeralStore`].
//!
//! Mounts a size-capped tmpfs with mode 0700 at the configured path. On
//! release every file is overwritten with zeros before the filesystem is
//! unmounted, and the mount directory is removed if this store created it.

use super::{EphemeralStore, KEYSTORE_MODE, KEYSTORE_SIZE};
use crate::error::{Result, SealKeyError};
use crate::tools::{detect_binary, run_tool, MOUNT_PATHS, UMOUNT_PATHS};
use std::cell::Cell;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ephemeral key store on a private tmpfs mount
#[derive(Debug)]
pub struct TmpfsStore {
    mount_path: PathBuf,
    mount_bin: PathBuf,
    umount_bin: PathBuf,
    created_dir: Cell<bool>,
    mounted: Cell<bool>,
}

impl TmpfsStore {
    /// Create a store at `mount_path` using explicit mount tools
    pub fn new(
        mount_path: impl Into<PathBuf>,
        mount_bin: impl Into<PathBuf>,
        umount_bin: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mount_path: mount_path.into(),
            mount_bin: mount_bin.into(),
            umount_bin: umount_bin.into(),
            created_dir: Cell::new(false),
            mounted: Cell::new(false),
        }
    }

    /// Create a store at `mount_path` using the system's mount tools
    pub fn detect(mount_path: impl Into<PathBuf>) -> Self {
        Self::new(
            mount_path,
            detect_binary(MOUNT_PATHS),
            detect_binary(UMOUNT_PATHS),
        )
    }

    /// Mount options passed to `mount -o`.
    pub fn mount_options() -> String {
        format!("size={},mode={:o}", KEYSTORE_SIZE, KEYSTORE_MODE)
    }

    fn prepare_dir(&self) -> Result<()> {
        let path = &self.mount_path;
        if path.exists() {
            if !path.is_dir() {
                return Err(SealKeyError::KeyStore(format!(
                    "{} exists and is not a directory",
                    path.display()
                )));
            }
            if is_mount_point(path)? {
                return Err(SealKeyError::KeyStore(format!(
                    "{} is already a mount point",
                    path.display()
                )));
            }
            if fs::read_dir(path)?.next().is_some() {
                return Err(SealKeyError::KeyStore(format!(
                    "{} is not empty",
                    path.display()
                )));
            }
            return Ok(());
        }

        create_private_dir(path)?;
        self.created_dir.set(true);
        Ok(())
    }

    fn remove_created_dir(&self) {
        if self.created_dir.get() {
            if let Err(e) = fs::remove_dir(&self.mount_path) {
                tracing::warn!(path = %self.mount_path.display(), error = %e, "could not remove key store directory");
            } else {
                self.created_dir.set(false);
            }
        }
    }
}

impl EphemeralStore for TmpfsStore {
    fn acquire(&self) -> Result<PathBuf> {
        self.prepare_dir().map_err(|e| match e {
            SealKeyError::KeyStore(_) => e,
            other => SealKeyError::KeyStore(other.to_string()),
        })?;

        let args = [
            OsString::from("-t"),
            OsString::from("tmpfs"),
            OsString::from("-o"),
            OsString::from(Self::mount_options()),
            OsString::from("tmpfs"),
            self.mount_path.as_os_str().to_os_string(),
        ];

        if let Err(e) = run_tool(&self.mount_bin, &args, None) {
            self.remove_created_dir();
            return Err(SealKeyError::KeyStore(format!(
                "cannot mount tmpfs on {}: {}",
                self.mount_path.display(),
                e
            )));
        }
        self.mounted.set(true);

        Ok(self.mount_path.clone())
    }

    fn release(&self) -> Result<()> {
        if !self.mounted.get() {
            self.remove_created_dir();
            return Ok(());
        }

        if let Err(e) = scrub_dir(&self.mount_path) {
            tracing::warn!(path = %self.mount_path.display(), error = %e, "could not scrub key store");
        }

        let args = [self.mount_path.as_os_str().to_os_string()];
        run_tool(&self.umount_bin, &args, None).map_err(|e| {
            SealKeyError::KeyStore(format!(
                "cannot unmount {}: {}",
                self.mount_path.display(),
                e
            ))
        })?;
        self.mounted.set(false);

        self.remove_created_dir();
        Ok(())
    }
}

/// Create `path` readable only by its owner.
fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(KEYSTORE_MODE);
    }
    builder.create(path)?;
    Ok(())
}

/// A directory is a mount point when it lives on a different device than its parent.
#[cfg(unix)]
fn is_mount_point(path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(true),
    };
    let own = fs::metadata(path)?;
    let parent = fs::metadata(parent)?;
    Ok(own.dev() != parent.dev())
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path) -> Result<bool> {
    Ok(false)
}

/// Overwrite every regular file in `dir` with zeros, then delete it.
pub(crate) fn scrub_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }

        let len = entry.metadata()?.len() as usize;
        let mut file = fs::OpenOptions::new().write(true).open(&path)?;
        file.write_all(&vec![0u8; len])?;
        file.sync_all()?;
        drop(file);
        fs::remove_file(&path)?;
    }
    Ok(())
}
