// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Error types for the sealed-key lifecycle tool.
//!
//! Every collaborator (key store, sealing tools, cryptsetup, credential
//! prompts) reports through [`SealKeyError`]. Process-level failures map to a
//! fixed exit code via [`SealKeyError::exit_code`]; step failures inside a
//! lifecycle operation are converted into an
//! [`Outcome`](crate::lifecycle::Outcome) by the orchestrator instead.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for usage and configuration errors.
pub const EXIT_USAGE: u8 = 1;

/// Exit code when the tool is not run as root.
pub const EXIT_PRIVILEGE: u8 = 2;

/// Exit code when the ephemeral key store cannot be created.
pub const EXIT_KEYSTORE: u8 = 3;

/// Exit code when another instance holds the operation lock.
pub const EXIT_LOCKED: u8 = 8;

/// Main error type for all sealed-key operations.
#[derive(Error, Debug)]
pub enum SealKeyError {
    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key slot index outside 0-7.
    #[error("Invalid key slot {0} (valid range 0-7)")]
    InvalidSlot(u8),

    /// PCR index outside 0-23.
    #[error("Invalid PCR index {0} (valid range 0-23)")]
    InvalidPcr(u8),

    /// Sealed-key slot and reset slot point at the same index.
    #[error("Sealed-key slot and reset slot must differ (both are {0})")]
    SlotConflict(u8),

    /// Missing privilege for header or mount operations.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Ephemeral key store could not be created or removed.
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Random source unavailable.
    #[error("Random number generator error: {0}")]
    Random(String),

    /// Hardware sealing or unsealing failed.
    #[error("Sealing error: {0}")]
    Sealing(String),

    /// LUKS key slot operation failed.
    #[error("Key slot error: {0}")]
    Slot(String),

    /// Credential could not be collected from the operator.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Another instance holds the operation lock.
    #[error("Another instance is running (lock held on {})", .0.display())]
    Locked(PathBuf),

    /// External tool exited unsuccessfully.
    #[error("{tool} failed (status {status})")]
    ToolFailed {
        /// Tool name.
        tool: String,
        /// Exit status rendered for display.
        status: String,
    },
}

impl SealKeyError {
    /// Process exit code for errors that abort before an operation runs.
    pub fn exit_code(&self) -> u8 {
        match self {
            SealKeyError::InvalidConfig(_)
            | SealKeyError::InvalidSlot(_)
            | SealKeyError::InvalidPcr(_)
            | SealKeyError::SlotConflict(_) => EXIT_USAGE,
            SealKeyError::PermissionDenied(_) => EXIT_PRIVILEGE,
            SealKeyError::KeyStore(_) => EXIT_KEYSTORE,
            SealKeyError::Locked(_) => EXIT_LOCKED,
            _ => EXIT_USAGE,
        }
    }
}

/// Type alias for Results using SealKeyError.
pub type Result<T> = std::result::Result<T, SealKeyError>;
