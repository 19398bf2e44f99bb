// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Ephemeral key store
//!
//! Cleartext keyfiles only ever exist inside a small memory-backed filesystem
//! that is created at the start of an operation and destroyed at the end.
//! [`KeyStoreGuard`] ties the store's lifetime to a scope: it is released when
//! the guard is dropped, on success and failure paths alike.
//!
//! # Layout
//!
//! ```text
//! <mount path>/
//! ├── keyfile        freshly generated key
//! └── keyfile.orig   key recovered by unsealing
//! ```

mod tmpfs;

pub use tmpfs::TmpfsStore;

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Maximum size of the store (tmpfs `size=` option).
pub const KEYSTORE_SIZE: &str = "1m";

/// Permission bits for the store root.
pub const KEYSTORE_MODE: u32 = 0o700;

/// File name of the freshly generated keyfile.
pub const NEW_KEYFILE_NAME: &str = "keyfile";

/// File name of the keyfile recovered by unsealing.
pub const ORIGINAL_KEYFILE_NAME: &str = "keyfile.orig";

/// Volatile storage for cleartext key material.
pub trait EphemeralStore {
    /// Create the store and return its root directory.
    fn acquire(&self) -> Result<PathBuf>;

    /// Destroy the store and everything in it.
    fn release(&self) -> Result<()>;
}

/// Scoped acquisition of an [`EphemeralStore`].
///
/// The store is released exactly once: explicitly through
/// [`KeyStoreGuard::release`], or otherwise when the guard is dropped.
pub struct KeyStoreGuard<'a> {
    store: &'a dyn EphemeralStore,
    root: PathBuf,
    released: bool,
}

impl<'a> KeyStoreGuard<'a> {
    /// Acquire `store`, returning a guard that releases it on drop.
    pub fn acquire(store: &'a dyn EphemeralStore) -> Result<Self> {
        let root = store.acquire()?;
        tracing::debug!(root = %root.display(), "ephemeral key store acquired");
        Ok(Self {
            store,
            root,
            released: false,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location for a freshly generated keyfile.
    pub fn new_keyfile(&self) -> PathBuf {
        self.root.join(NEW_KEYFILE_NAME)
    }

    /// Location for the keyfile recovered by unsealing.
    pub fn original_keyfile(&self) -> PathBuf {
        self.root.join(ORIGINAL_KEYFILE_NAME)
    }

    /// Release the store now and report the outcome.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.store.release();
        if result.is_ok() {
            tracing::debug!(root = %self.root.display(), "ephemeral key store released");
        }
        result
    }
}

impl Drop for KeyStoreGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.store.release() {
            tracing::error!(root = %self.root.display(), error = %e, "failed to release ephemeral key store");
        }
    }
}
