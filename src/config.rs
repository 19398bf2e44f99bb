// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Configuration for sealed-key lifecycle operations.
//!
//! All paths, slot numbers and the sealing policy live in one explicit
//! [`SealKeyConfig`] handed to the orchestrator at construction time.

use crate::error::{Result, SealKeyError};
use crate::hsm::{SealPolicy, DEFAULT_PCRS};
use crate::lock::DEFAULT_LOCK_PATH;
use crate::luks::KeySlot;
use crate::tools::{
    detect_binary, CRYPTSETUP_PATHS, MOUNT_PATHS, TPM_SEALDATA_PATHS, TPM_UNSEALDATA_PATHS,
    UMOUNT_PATHS,
};
use std::path::PathBuf;

/// Default mount point of the ephemeral key store.
pub const DEFAULT_MOUNT_PATH: &str = "/root/keyfs";

/// Default location of the sealed keyfile.
pub const DEFAULT_SEALED_KEYFILE: &str = "/boot/keyfile.enc";

/// Default slot holding the sealed key.
pub const DEFAULT_SEALED_SLOT: u8 = 1;

/// Default slot holding the temporary passphrase.
pub const DEFAULT_RESET_SLOT: u8 = 2;

/// Locations of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// `cryptsetup`
    pub cryptsetup: PathBuf,
    /// `tpm_sealdata`
    pub tpm_sealdata: PathBuf,
    /// `tpm_unsealdata`
    pub tpm_unsealdata: PathBuf,
    /// `mount`
    pub mount: PathBuf,
    /// `umount`
    pub umount: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            cryptsetup: detect_binary(CRYPTSETUP_PATHS),
            tpm_sealdata: detect_binary(TPM_SEALDATA_PATHS),
            tpm_unsealdata: detect_binary(TPM_UNSEALDATA_PATHS),
            mount: detect_binary(MOUNT_PATHS),
            umount: detect_binary(UMOUNT_PATHS),
        }
    }
}

/// Configuration for one invocation against one device.
#[derive(Debug, Clone)]
pub struct SealKeyConfig {
    /// Block device carrying the LUKS header
    pub device: PathBuf,
    /// Mount point of the ephemeral key store
    pub mount_path: PathBuf,
    /// Sealed keyfile on persistent storage
    pub sealed_keyfile: PathBuf,
    /// Slot holding the sealed key
    pub sealed_slot: KeySlot,
    /// Slot holding the temporary passphrase
    pub reset_slot: KeySlot,
    /// Policy used for sealing and unsealing
    pub policy: SealPolicy,
    /// Lock file, or `None` to run without mutual exclusion
    pub lock_path: Option<PathBuf>,
    /// External tool locations
    pub tools: ToolPaths,
}

impl SealKeyConfig {
    /// Creates a configuration for `device` with every other setting at its default.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tesseract_sealkey::config::SealKeyConfig;
    /// let config = SealKeyConfig::new("/dev/sda2");
    /// assert_eq!(config.sealed_slot.index(), 1);
    /// assert_eq!(config.reset_slot.index(), 2);
    /// ```
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            mount_path: PathBuf::from(DEFAULT_MOUNT_PATH),
            sealed_keyfile: PathBuf::from(DEFAULT_SEALED_KEYFILE),
            sealed_slot: KeySlot(DEFAULT_SEALED_SLOT),
            reset_slot: KeySlot(DEFAULT_RESET_SLOT),
            policy: SealPolicy::default(),
            lock_path: Some(PathBuf::from(DEFAULT_LOCK_PATH)),
            tools: ToolPaths::default(),
        }
    }

    /// Checks the configuration before anything is touched.
    ///
    /// # Errors
    ///
    /// - the device does not exist
    /// - sealed-key slot and reset slot are the same
    /// - the PCR selection is empty
    /// - the mount path is not absolute
    pub fn validate(&self) -> Result<()> {
        if self.sealed_slot == self.reset_slot {
            return Err(SealKeyError::SlotConflict(self.sealed_slot.index()));
        }
        if self.policy.pcrs().is_empty() {
            return Err(SealKeyError::InvalidConfig(
                "at least one PCR must be selected".into(),
            ));
        }
        if !self.mount_path.is_absolute() {
            return Err(SealKeyError::InvalidConfig(format!(
                "mount path must be absolute: {}",
                self.mount_path.display()
            )));
        }
        if !self.device.exists() {
            return Err(SealKeyError::InvalidConfig(format!(
                "device not found: {}",
                self.device.display()
            )));
        }
        Ok(())
    }
}

/// Default PCR selection as raw indices.
pub fn default_pcrs() -> Vec<u8> {
    DEFAULT_PCRS.to_vec()
}
