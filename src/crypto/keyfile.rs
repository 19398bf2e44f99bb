// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Random keyfile generation for the sealed-key slot.
//!
//! # File Format
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Random bytes from the OS RNG            │  2048 bytes
//! └─────────────────────────────────────────┘
//! ```
//!
//! The file has no header: LUKS consumes it verbatim as a keyfile and the
//! sealing tool treats it as opaque data.

use crate::error::{Result, SealKeyError};
use rand::rngs::OsRng;
use rand_core::TryRngCore;
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroizing;

/// Size of a generated keyfile in bytes.
pub const KEYFILE_SIZE: usize = 2048;

/// Source of fresh keyfiles.
pub trait KeyfileGenerator {
    /// Write a new random keyfile to `dest`, which must not exist yet.
    fn generate(&self, dest: &Path) -> Result<()>;
}

/// Keyfile generator backed by the operating system RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngGenerator;

impl KeyfileGenerator for OsRngGenerator {
    fn generate(&self, dest: &Path) -> Result<()> {
        generate_keyfile(dest)
    }
}

/// Generate a [`KEYFILE_SIZE`]-byte random keyfile at `dest`.
///
/// The buffer is zeroized after writing. The file is created exclusively with
/// mode 0600; an existing file at `dest` is an error rather than overwritten.
///
/// # Errors
///
/// Returns [`SealKeyError::Random`] if the OS random source fails, or an I/O
/// error if the file cannot be written.
pub fn generate_keyfile(dest: &Path) -> Result<()> {
    let mut key = Zeroizing::new(vec![0u8; KEYFILE_SIZE]);
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| SealKeyError::Random(format!("RNG error: {}", e)))?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(dest)?;
    if let Err(e) = file.write_all(&key).and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(dest);
        return Err(e.into());
    }

    Ok(())
}
