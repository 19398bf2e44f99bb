// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Key material generation.
//!
//! The only cryptography performed in-process is drawing fresh keyfiles from
//! the operating system's random source. Sealing is delegated to the TPM
//! through [`crate::hsm`], and slot encryption to LUKS through [`crate::luks`].

pub mod keyfile;

pub use keyfile::{generate_keyfile, KeyfileGenerator, OsRngGenerator, KEYFILE_SIZE};
