// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! TPM sealing backend
//!
//! Seals keyfiles to Platform Configuration Register (PCR) measurements with
//! the `tpm_sealdata` / `tpm_unsealdata` tools. The sealed blob format is owned
//! by those tools and treated as opaque here.
//!
//! # Security Considerations
//!
//! - Sealed keys are only recoverable when the selected PCR values match
//! - A new blob is staged next to the old one and only renamed into place
//!   after the tool reports success
//! - Unsealed output files are restricted to mode 0600
//!
//! # Example
//!
//! ```no_run
//! use tesseract_sealkey::hsm::{SealPolicy, SealingGateway, TpmToolsSealer};
//! use std::path::Path;
//!
//! let sealer = TpmToolsSealer::detect();
//! let policy = SealPolicy::default();
//! sealer.unseal(&policy, Path::new("/boot/keyfile.enc"), Path::new("/root/keyfs/keyfile"))?;
//! # Ok::<(), tesseract_sealkey::error::SealKeyError>(())
//! ```

use super::tpm_utils::{build_seal_args, build_unseal_args, pcr_mask_hex, staging_path};
use super::{SealPolicy, SealingGateway};
use crate::error::{Result, SealKeyError};
use crate::tools::{detect_binary, run_tool, TPM_SEALDATA_PATHS, TPM_UNSEALDATA_PATHS};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest valid PCR index.
pub const MAX_PCR_INDEX: u8 = 23;

/// TPM error types
#[derive(Debug, Clone)]
pub enum TpmError {
    /// TPM device not found
    DeviceNotFound,
    /// Sealed keyfile does not exist
    SealedBlobMissing(PathBuf),
    /// Cleartext keyfile to seal does not exist
    SourceMissing(PathBuf),
    /// Sealing tool failed
    CommandFailed(String),
    /// Platform-specific error
    PlatformError(String),
}

impl fmt::Display for TpmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpmError::DeviceNotFound => write!(f, "TPM device not found"),
            TpmError::SealedBlobMissing(p) => {
                write!(f, "Sealed keyfile not found: {}", p.display())
            }
            TpmError::SourceMissing(p) => write!(f, "Keyfile to seal not found: {}", p.display()),
            TpmError::CommandFailed(msg) => write!(f, "TPM command failed: {}", msg),
            TpmError::PlatformError(msg) => write!(f, "Platform error: {}", msg),
        }
    }
}

impl std::error::Error for TpmError {}

impl From<TpmError> for SealKeyError {
    fn from(e: TpmError) -> Self {
        SealKeyError::Sealing(e.to_string())
    }
}

/// PCR (Platform Configuration Register) index, 0-23
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PcrIndex(pub(crate) u8);

impl PcrIndex {
    /// Raw register number.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PcrIndex {
    type Error = SealKeyError;

    fn try_from(value: u8) -> Result<Self> {
        if value > MAX_PCR_INDEX {
            return Err(SealKeyError::InvalidPcr(value));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for PcrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sealing backend driving the TPM through `tpm_sealdata` / `tpm_unsealdata`
#[derive(Debug, Clone)]
pub struct TpmToolsSealer {
    sealdata: PathBuf,
    unsealdata: PathBuf,
}

impl TpmToolsSealer {
    /// Create a sealer with explicit tool paths
    pub fn new(sealdata: impl Into<PathBuf>, unsealdata: impl Into<PathBuf>) -> Self {
        Self {
            sealdata: sealdata.into(),
            unsealdata: unsealdata.into(),
        }
    }

    /// Create a sealer using the first tool locations found on this system
    pub fn detect() -> Self {
        Self::new(
            detect_binary(TPM_SEALDATA_PATHS),
            detect_binary(TPM_UNSEALDATA_PATHS),
        )
    }

    /// Check if a TPM device node is present
    #[cfg(target_os = "linux")]
    pub fn is_present() -> bool {
        Path::new("/dev/tpm0").exists() || Path::new("/dev/tpmrm0").exists()
    }

    #[cfg(not(target_os = "linux"))]
    pub fn is_present() -> bool {
        false
    }

    fn ensure_device() -> Result<()> {
        if !Self::is_present() {
            return Err(TpmError::DeviceNotFound.into());
        }
        Ok(())
    }
}

impl SealingGateway for TpmToolsSealer {
    fn name(&self) -> &str {
        "tpm-tools"
    }

    fn seal(&self, policy: &SealPolicy, source: &Path, sealed: &Path) -> Result<()> {
        Self::ensure_device()?;
        if !source.exists() {
            return Err(TpmError::SourceMissing(source.to_path_buf()).into());
        }

        let staging = staging_path(sealed);
        tracing::debug!(
            pcr_mask = %pcr_mask_hex(policy.pcrs()),
            well_known = policy.well_known,
            sealed = %sealed.display(),
            "sealing keyfile"
        );

        let args = build_seal_args(policy, source, &staging);
        if let Err(e) = run_tool(&self.sealdata, &args, None) {
            let _ = fs::remove_file(&staging);
            return Err(TpmError::CommandFailed(e.to_string()).into());
        }

        // Replace the previous blob only once the new one is complete
        if let Err(e) = fs::rename(&staging, sealed) {
            let _ = fs::remove_file(&staging);
            return Err(TpmError::PlatformError(format!(
                "cannot replace {}: {}",
                sealed.display(),
                e
            ))
            .into());
        }

        Ok(())
    }

    fn unseal(&self, policy: &SealPolicy, sealed: &Path, dest: &Path) -> Result<()> {
        if !sealed.exists() {
            return Err(TpmError::SealedBlobMissing(sealed.to_path_buf()).into());
        }
        Self::ensure_device()?;

        let args = build_unseal_args(policy, sealed, dest);
        if let Err(e) = run_tool(&self.unsealdata, &args, None) {
            let _ = fs::remove_file(dest);
            return Err(TpmError::CommandFailed(e.to_string()).into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dest, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}
