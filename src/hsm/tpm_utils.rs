// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Pure utility functions for the TPM sealing tools, extracted for testability.
//!
//! Nothing in here touches the TPM or spawns a process, so the argument
//! layout of every sealing call can be checked without hardware.

use super::tpm::PcrIndex;
use super::SealPolicy;
use std::ffi::OsString;
use std::path::Path;

// ============================================================================
// Tool flags
// ============================================================================

/// Command-line flags understood by `tpm_sealdata` / `tpm_unsealdata`
pub mod flags {
    /// Input file
    pub const INPUT: &str = "-i";
    /// Output file
    pub const OUTPUT: &str = "-o";
    /// PCR to bind to (repeatable, sealing only)
    pub const PCR: &str = "-p";
    /// Use the well-known SRK secret
    pub const WELL_KNOWN: &str = "-z";
}

// ============================================================================
// PCR Bitmap Functions
// ============================================================================

/// Calculate the byte index and bit mask for a PCR index.
///
/// PCR selection bitmaps place PCRs 0-7 in byte 0, 8-15 in byte 1, etc.
pub fn pcr_index_to_bitmap(pcr_index: u8) -> (u8, u8) {
    let byte_index = pcr_index / 8;
    let bit_mask = 1u8 << (pcr_index % 8);
    (byte_index, bit_mask)
}

/// Create a 3-byte PCR selection bitmap for multiple PCRs.
pub fn create_pcr_select_bitmap_multi(pcr_indices: &[PcrIndex]) -> [u8; 3] {
    let mut bitmap = [0u8; 3];
    for idx in pcr_indices {
        let (byte_idx, bit_mask) = pcr_index_to_bitmap(idx.value());
        if byte_idx < 3 {
            bitmap[byte_idx as usize] |= bit_mask;
        }
    }
    bitmap
}

/// Render a PCR selection as a hex mask, PCR 0 in the lowest bit.
///
/// Used in log output so two policies can be compared at a glance.
pub fn pcr_mask_hex(pcr_indices: &[PcrIndex]) -> String {
    let bitmap = create_pcr_select_bitmap_multi(pcr_indices);
    let mask = u32::from(bitmap[0]) | u32::from(bitmap[1]) << 8 | u32::from(bitmap[2]) << 16;
    format!("0x{:06x}", mask)
}

// ============================================================================
// Argument Builders
// ============================================================================

/// Build the argument list for `tpm_sealdata`.
pub fn build_seal_args(policy: &SealPolicy, source: &Path, output: &Path) -> Vec<OsString> {
    let mut args = Vec::with_capacity(5 + policy.pcrs().len() * 2);

    if policy.well_known {
        args.push(OsString::from(flags::WELL_KNOWN));
    }
    for pcr in policy.pcrs() {
        args.push(OsString::from(flags::PCR));
        args.push(OsString::from(pcr.value().to_string()));
    }
    args.push(OsString::from(flags::INPUT));
    args.push(source.as_os_str().to_os_string());
    args.push(OsString::from(flags::OUTPUT));
    args.push(output.as_os_str().to_os_string());

    args
}

/// Build the argument list for `tpm_unsealdata`.
///
/// The PCR selection is recorded inside the sealed blob, so only the
/// well-known flag is passed through.
pub fn build_unseal_args(policy: &SealPolicy, sealed: &Path, dest: &Path) -> Vec<OsString> {
    let mut args = Vec::with_capacity(5);

    if policy.well_known {
        args.push(OsString::from(flags::WELL_KNOWN));
    }
    args.push(OsString::from(flags::INPUT));
    args.push(sealed.as_os_str().to_os_string());
    args.push(OsString::from(flags::OUTPUT));
    args.push(dest.as_os_str().to_os_string());

    args
}

/// Staging path a new sealed blob is written to before replacing the old one.
pub fn staging_path(sealed: &Path) -> std::path::PathBuf {
    let mut name = sealed
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("sealed"));
    name.push(".tmp");
    sealed.with_file_name(name)
}
