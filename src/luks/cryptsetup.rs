// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! `cryptsetup` backend for [`SlotManager`].
//!
//! Passphrases never appear on the command line. They are written to the
//! child's stdin, either raw (`--key-file -`, no trailing newline) for the
//! authorizing credential, or as a single line when cryptsetup prompts for a
//! new passphrase.

use super::{Credential, KeySlot, SlotManager};
use crate::error::{Result, SealKeyError};
use crate::tools::{detect_binary, passphrase_line, run_tool, CRYPTSETUP_PATHS};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// A prepared cryptsetup invocation.
struct Invocation {
    args: Vec<OsString>,
    stdin: Option<Zeroizing<Vec<u8>>>,
}

/// Slot manager driving the `cryptsetup` binary
#[derive(Debug, Clone)]
pub struct CryptsetupSlots {
    binary: PathBuf,
}

impl CryptsetupSlots {
    /// Create a slot manager using an explicit `cryptsetup` path
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Create a slot manager using the first `cryptsetup` found on this system
    pub fn detect() -> Self {
        Self::new(detect_binary(CRYPTSETUP_PATHS))
    }

    fn run(&self, action: &str, invocation: Invocation) -> Result<()> {
        run_tool(
            &self.binary,
            &invocation.args,
            invocation.stdin.as_ref().map(|s| s.as_slice()),
        )
        .map_err(|e| SealKeyError::Slot(format!("{}: {}", action, e)))
    }
}

impl Default for CryptsetupSlots {
    fn default() -> Self {
        Self::detect()
    }
}

/// Append `--key-file` for the authorizing credential.
///
/// Returns the raw passphrase bytes to feed on stdin, if any.
fn push_auth(args: &mut Vec<OsString>, auth: &Credential) -> Option<Zeroizing<Vec<u8>>> {
    args.push(OsString::from("--key-file"));
    match auth {
        Credential::Keyfile(path) => {
            args.push(path.as_os_str().to_os_string());
            None
        }
        Credential::Passphrase(pass) => {
            args.push(OsString::from("-"));
            Some(Zeroizing::new(pass.as_bytes().to_vec()))
        }
    }
}

fn slot_arg(slot: KeySlot) -> [OsString; 2] {
    [
        OsString::from("--key-slot"),
        OsString::from(slot.index().to_string()),
    ]
}

fn build_add_key(
    device: &Path,
    slot: KeySlot,
    new_key: &Credential,
    auth: &Credential,
) -> Result<Invocation> {
    let mut args = vec![OsString::from("luksAddKey")];
    args.extend(slot_arg(slot));

    let auth_stdin = push_auth(&mut args, auth);
    args.push(device.as_os_str().to_os_string());

    let stdin = match (new_key, auth_stdin) {
        (Credential::Keyfile(path), auth_stdin) => {
            args.push(path.as_os_str().to_os_string());
            auth_stdin
        }
        (Credential::Passphrase(pass), None) => Some(passphrase_line(pass)),
        (Credential::Passphrase(_), Some(_)) => {
            // Both secrets would have to share stdin
            return Err(SealKeyError::Slot(
                "adding a passphrase requires keyfile authorization".into(),
            ));
        }
    };

    Ok(Invocation { args, stdin })
}

fn build_kill_slot(device: &Path, slot: KeySlot, auth: &Credential) -> Invocation {
    let mut args = vec![OsString::from("luksKillSlot")];
    let stdin = push_auth(&mut args, auth);
    args.push(device.as_os_str().to_os_string());
    args.push(OsString::from(slot.index().to_string()));
    Invocation { args, stdin }
}

fn build_change_key(
    device: &Path,
    slot: KeySlot,
    new_keyfile: &Path,
    auth: &Credential,
) -> Invocation {
    let mut args = vec![OsString::from("luksChangeKey")];
    args.extend(slot_arg(slot));
    let stdin = push_auth(&mut args, auth);
    args.push(device.as_os_str().to_os_string());
    args.push(new_keyfile.as_os_str().to_os_string());
    Invocation { args, stdin }
}

impl SlotManager for CryptsetupSlots {
    fn add_key(
        &self,
        device: &Path,
        slot: KeySlot,
        new_key: &Credential,
        auth: &Credential,
    ) -> Result<()> {
        self.run("luksAddKey", build_add_key(device, slot, new_key, auth)?)
    }

    fn kill_slot(&self, device: &Path, slot: KeySlot, auth: &Credential) -> Result<()> {
        self.run("luksKillSlot", build_kill_slot(device, slot, auth))
    }

    fn change_key(
        &self,
        device: &Path,
        slot: KeySlot,
        new_keyfile: &Path,
        auth: &Credential,
    ) -> Result<()> {
        self.run(
            "luksChangeKey",
            build_change_key(device, slot, new_keyfile, auth),
        )
    }
}
