// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Privilege checks.
//!
//! Editing a LUKS header, talking to the TPM and mounting tmpfs all require
//! root, so the tool refuses to start otherwise.

use crate::error::{Result, SealKeyError};

/// Effective user id of the current process.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

/// Fail unless running with an effective uid of 0.
pub fn require_root() -> Result<()> {
    check_root(effective_uid())
}

fn check_root(euid: u32) -> Result<()> {
    if euid != 0 {
        return Err(SealKeyError::PermissionDenied(format!(
            "must be run as root (effective uid {})",
            euid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EXIT_PRIVILEGE;

    #[test]
    fn test_root_accepted() {
        assert!(check_root(0).is_ok());
    }

    #[test]
    fn test_non_root_rejected() {
        let err = check_root(1000).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_PRIVILEGE);
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn test_require_root_matches_euid() {
        assert_eq!(require_root().is_ok(), effective_uid() == 0);
    }
}
