// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Operator credential input.
//!
//! Lifecycle operations that need a passphrase ask a [`CredentialProvider`]
//! for it instead of reading the terminal themselves, so tests can supply
//! canned input. [`TerminalCredentials`] is the interactive implementation.
//!
//! # Security
//!
//! - Passphrases are held in zeroizing memory
//! - Confirmation uses constant-time comparison
//! - Prompts go to the controlling terminal, never to stdout

use crate::error::{Result, SealKeyError};
use rpassword::prompt_password;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Maximum passphrase length accepted by LUKS.
pub const MAX_PASSPHRASE_LENGTH: usize = 512;

/// Blocking source of operator passphrases.
pub trait CredentialProvider {
    /// An existing passphrase that unlocks any slot of the device.
    fn existing_passphrase(&mut self) -> Result<Zeroizing<String>>;

    /// A new passphrase, confirmed by the operator.
    fn new_passphrase(&mut self) -> Result<Zeroizing<String>>;
}

/// Prompts on the controlling terminal with echo disabled.
#[derive(Debug, Default)]
pub struct TerminalCredentials;

impl CredentialProvider for TerminalCredentials {
    fn existing_passphrase(&mut self) -> Result<Zeroizing<String>> {
        let pass = read("Enter any existing LUKS passphrase: ")?;
        validate_passphrase(&pass)?;
        Ok(pass)
    }

    fn new_passphrase(&mut self) -> Result<Zeroizing<String>> {
        let pass = read("Enter new temporary passphrase: ")?;
        validate_passphrase(&pass)?;
        let confirm = read("Confirm temporary passphrase: ")?;
        confirm_passphrase(&pass, &confirm)?;
        Ok(pass)
    }
}

fn read(prompt: &str) -> Result<Zeroizing<String>> {
    prompt_password(prompt)
        .map(Zeroizing::new)
        .map_err(|e| SealKeyError::Credential(format!("cannot read passphrase: {}", e)))
}

/// Reject passphrases LUKS cannot use.
pub fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.is_empty() {
        return Err(SealKeyError::Credential("passphrase cannot be empty".into()));
    }
    if passphrase.len() > MAX_PASSPHRASE_LENGTH {
        return Err(SealKeyError::Credential(format!(
            "passphrase too long (max {} bytes)",
            MAX_PASSPHRASE_LENGTH
        )));
    }
    Ok(())
}

/// Check that both entries match, in constant time.
pub fn confirm_passphrase(first: &str, second: &str) -> Result<()> {
    if !bool::from(first.as_bytes().ct_eq(second.as_bytes())) {
        return Err(SealKeyError::Credential("passphrases do not match".into()));
    }
    Ok(())
}
