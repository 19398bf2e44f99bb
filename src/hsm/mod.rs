// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Hardware sealing integration
//!
//! The lifecycle orchestrator never talks to the TPM directly. It goes through
//! [`SealingGateway`], which binds key material to the platform state described
//! by a [`SealPolicy`] and reverses that binding later.
//!
//! # Backends
//!
//! - [`tpm::TpmToolsSealer`]: runs `tpm_sealdata` / `tpm_unsealdata`
//! - test doubles implementing [`SealingGateway`]

pub mod tpm;

/// Pure utility functions for the sealing tools, testable without hardware.
pub mod tpm_utils;

use crate::error::Result;
use std::path::Path;

pub use tpm::{PcrIndex, TpmError, TpmToolsSealer};

/// Default PCR selection: the firmware and boot-loader measurements.
pub const DEFAULT_PCRS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// Policy used for both sealing and unsealing within one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealPolicy {
    /// PCR indices the sealed blob is bound to, sorted and deduplicated
    pcrs: Vec<PcrIndex>,
    /// Use the well-known (all-zero) SRK authorization
    pub well_known: bool,
}

impl SealPolicy {
    /// Builds a policy from raw PCR indices.
    ///
    /// Indices are validated, sorted and deduplicated. An empty selection is
    /// allowed here; [`SealKeyConfig::validate`](crate::config::SealKeyConfig::validate)
    /// decides whether it is acceptable.
    pub fn new(pcrs: &[u8], well_known: bool) -> Result<Self> {
        let mut selection = pcrs
            .iter()
            .map(|&p| PcrIndex::try_from(p))
            .collect::<Result<Vec<_>>>()?;
        selection.sort();
        selection.dedup();

        Ok(Self {
            pcrs: selection,
            well_known,
        })
    }

    /// PCR selection in ascending order.
    pub fn pcrs(&self) -> &[PcrIndex] {
        &self.pcrs
    }
}

impl Default for SealPolicy {
    fn default() -> Self {
        Self {
            pcrs: DEFAULT_PCRS.iter().map(|&p| PcrIndex(p)).collect(),
            well_known: false,
        }
    }
}

/// Seal / unseal capability of the hardware trust anchor.
///
/// Implementations report failures as errors and never retry. Callers must
/// inspect every result before taking the next step.
pub trait SealingGateway {
    /// Name of the backend, for diagnostics.
    fn name(&self) -> &str;

    /// Seals the cleartext `source` keyfile under `policy`, replacing `sealed`.
    ///
    /// On failure the previous contents of `sealed` must be left in place.
    fn seal(&self, policy: &SealPolicy, source: &Path, sealed: &Path) -> Result<()>;

    /// Unseals `sealed` into the cleartext keyfile `dest`.
    ///
    /// Fails if the current platform state does not satisfy the policy recorded
    /// at seal time.
    fn unseal(&self, policy: &SealPolicy, sealed: &Path, dest: &Path) -> Result<()>;
}
