// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! LUKS key slot management
//!
//! A LUKS header holds eight independent key slots, each unlocking the same
//! volume key. This tool only ever touches two of them:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 LUKS header                  │
//! ├──────────────────────────────────────────────┤
//! │  Sealed-key slot (default 1)                 │
//! │    random keyfile, sealed copy on /boot      │
//! ├──────────────────────────────────────────────┤
//! │  Reset slot (default 2)                      │
//! │    temporary operator passphrase             │
//! ├──────────────────────────────────────────────┤
//! │  Other slots: never modified                 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every mutation names its slot and its authorizing credential explicitly.
//! A failed mutation leaves the header unchanged, but callers must not
//! blindly retry: adding to an occupied slot fails, so slot occupancy is
//! part of each call's precondition.

mod cryptsetup;

pub use cryptsetup::CryptsetupSlots;

use crate::error::{Result, SealKeyError};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Highest valid LUKS key slot index.
pub const MAX_KEY_SLOT: u8 = 7;

/// LUKS key slot index, 0-7
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeySlot(pub(crate) u8);

impl KeySlot {
    /// Raw slot number.
    pub fn index(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for KeySlot {
    type Error = SealKeyError;

    fn try_from(value: u8) -> Result<Self> {
        if value > MAX_KEY_SLOT {
            return Err(SealKeyError::InvalidSlot(value));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credential presented to the LUKS header
pub enum Credential {
    /// Operator passphrase, kept in zeroizing memory
    Passphrase(Zeroizing<String>),
    /// Keyfile inside the ephemeral key store
    Keyfile(PathBuf),
}

impl Credential {
    /// Short description for logs; never includes secret material.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Passphrase(_) => "passphrase",
            Credential::Keyfile(_) => "keyfile",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            Credential::Keyfile(p) => f.debug_tuple("Keyfile").field(p).finish(),
        }
    }
}

/// Key slot mutations on one LUKS device.
pub trait SlotManager {
    /// Add `new_key` to `slot`, authorized by any existing credential.
    fn add_key(
        &self,
        device: &Path,
        slot: KeySlot,
        new_key: &Credential,
        auth: &Credential,
    ) -> Result<()>;

    /// Wipe `slot`, authorized by a credential for any other slot.
    fn kill_slot(&self, device: &Path, slot: KeySlot, auth: &Credential) -> Result<()>;

    /// Replace the key in `slot` with `new_keyfile`, authorized by the key
    /// currently in that slot.
    fn change_key(
        &self,
        device: &Path,
        slot: KeySlot,
        new_keyfile: &Path,
        auth: &Credential,
    ) -> Result<()>;
}
