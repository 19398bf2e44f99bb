// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! External tool invocation.
//!
//! Header edits, sealing and mounting are all delegated to system binaries.
//! This module locates them and runs them with secrets passed on stdin only.

use crate::error::{Result, SealKeyError};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use zeroize::Zeroizing;

/// Known locations for `cryptsetup`
pub const CRYPTSETUP_PATHS: &[&str] = &[
    "/sbin/cryptsetup",
    "/usr/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
];

/// Known locations for `tpm_sealdata`
pub const TPM_SEALDATA_PATHS: &[&str] = &["/usr/bin/tpm_sealdata", "/usr/sbin/tpm_sealdata"];

/// Known locations for `tpm_unsealdata`
pub const TPM_UNSEALDATA_PATHS: &[&str] = &["/usr/bin/tpm_unsealdata", "/usr/sbin/tpm_unsealdata"];

/// Known locations for `mount`
pub const MOUNT_PATHS: &[&str] = &["/bin/mount", "/usr/bin/mount"];

/// Known locations for `umount`
pub const UMOUNT_PATHS: &[&str] = &["/bin/umount", "/usr/bin/umount"];

/// Return the first candidate that exists, or the first candidate otherwise.
///
/// Falling back to the first entry keeps the error message meaningful when
/// the tool is missing entirely.
pub fn detect_binary(candidates: &[&str]) -> PathBuf {
    candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .or_else(|| candidates.first().map(Path::new))
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Run `binary` with `args`, optionally feeding `stdin`, and require success.
///
/// Stdout is discarded; stderr is inherited so the operator sees the tool's
/// own diagnostics.
pub fn run_tool(binary: &Path, args: &[OsString], stdin: Option<&[u8]>) -> Result<()> {
    let tool = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string());

    tracing::debug!(tool = %tool, argc = args.len(), "running external tool");

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn().map_err(|e| SealKeyError::ToolFailed {
        tool: tool.clone(),
        status: e.to_string(),
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            let write_result = pipe.write_all(input);
            drop(pipe);
            if let Err(e) = write_result {
                let _ = child.wait();
                return Err(SealKeyError::ToolFailed {
                    tool,
                    status: format!("stdin: {}", e),
                });
            }
        }
    }

    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(SealKeyError::ToolFailed {
            tool,
            status: status.to_string(),
        })
    }
}

/// Passphrase bytes as fed to a tool reading a line from stdin.
pub fn passphrase_line(passphrase: &str) -> Zeroizing<Vec<u8>> {
    let mut line = Zeroizing::new(Vec::with_capacity(passphrase.len() + 1));
    line.extend_from_slice(passphrase.as_bytes());
    line.push(b'\n');
    line
}
