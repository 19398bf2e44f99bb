// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Operation outcomes and the recovery trail.
//!
//! There is no rollback for a LUKS header edit, so every operation records
//! each step as it completes. When something fails, the trail says exactly
//! which durable artifact (sealed keyfile, sealed-key slot, reset slot) is in
//! which state, and the operator decides how to recover.

use crate::config::SealKeyConfig;
use std::fmt;
use std::str::FromStr;

/// Top-level lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Add a temporary passphrase to the reset slot
    Temp,
    /// Replace the sealed key using an operator passphrase
    Reset,
    /// Replace the sealed key using the current sealed key
    Replace,
}

impl Action {
    /// Name used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Temp => "temp",
            Action::Reset => "reset",
            Action::Replace => "replace",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "temp" => Ok(Action::Temp),
            "reset" => Ok(Action::Reset),
            "replace" => Ok(Action::Replace),
            other => Err(format!(
                "unknown action '{}' (expected temp, reset or replace)",
                other
            )),
        }
    }
}

/// Result of one lifecycle operation, mapped to a process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All steps completed
    Success,
    /// `reset` did not complete; the reset slot was left in place
    ResetPartial,
    /// `temp` could not add the temporary passphrase
    TempFailed,
    /// `replace` did not change the sealed-key slot
    ReplaceSlotChangeFailed,
    /// `replace` changed the slot but could not seal the new key
    ReplaceSealFailed,
}

impl Outcome {
    /// Process exit code.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::ResetPartial => 4,
            Outcome::TempFailed => 5,
            Outcome::ReplaceSlotChangeFailed => 6,
            Outcome::ReplaceSealFailed => 7,
        }
    }

    /// Whether the operation completed.
    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

/// A completed step, recorded in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    /// Ephemeral key store mounted
    StoreAcquired,
    /// Sealed keyfile unsealed into the store
    Unsealed,
    /// Operator passphrase collected
    PassphraseCollected,
    /// Fresh keyfile generated into the store
    KeyGenerated,
    /// Temporary passphrase added to the reset slot
    ResetSlotAdded,
    /// Old key removed from the sealed-key slot
    SealedSlotKilled,
    /// New keyfile added to the sealed-key slot
    SealedSlotAdded,
    /// Sealed-key slot switched from the old to the new keyfile
    SealedSlotChanged,
    /// New keyfile sealed over the sealed keyfile
    Sealed,
    /// Temporary passphrase removed from the reset slot
    ResetSlotKilled,
    /// Ephemeral key store unmounted
    StoreReleased,
}

impl Checkpoint {
    /// Whether this step changed durable state that cannot be rolled back.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Checkpoint::ResetSlotAdded
                | Checkpoint::SealedSlotKilled
                | Checkpoint::SealedSlotAdded
                | Checkpoint::SealedSlotChanged
                | Checkpoint::Sealed
                | Checkpoint::ResetSlotKilled
        )
    }
}

/// The step that stopped an operation and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Step name
    pub step: &'static str,
    /// Error message from the collaborator
    pub error: String,
}

/// Everything that happened during one operation
#[derive(Debug, Clone)]
pub struct OperationReport {
    /// Operation that ran
    pub action: Action,
    /// Final outcome
    pub outcome: Outcome,
    /// Completed steps in order
    pub checkpoints: Vec<Checkpoint>,
    /// First failing step, if any
    pub failure: Option<StepFailure>,
    /// Non-fatal problems the operator should know about
    pub warnings: Vec<String>,
}

impl OperationReport {
    /// Empty report for `action`, provisionally successful.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            outcome: Outcome::Success,
            checkpoints: Vec::new(),
            failure: None,
            warnings: Vec::new(),
        }
    }

    /// Record a completed step.
    pub fn record(&mut self, checkpoint: Checkpoint) {
        tracing::debug!(action = %self.action, ?checkpoint, "checkpoint");
        self.checkpoints.push(checkpoint);
    }

    /// Record the failing step. Only the first failure is kept.
    pub fn fail(&mut self, step: &'static str, error: impl fmt::Display) {
        if self.failure.is_none() {
            self.failure = Some(StepFailure {
                step,
                error: error.to_string(),
            });
        }
    }

    /// Record a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Whether `checkpoint` was reached.
    pub fn reached(&self, checkpoint: Checkpoint) -> bool {
        self.checkpoints.contains(&checkpoint)
    }

    /// The most recent step that changed durable state.
    pub fn last_destructive(&self) -> Option<Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .copied()
            .find(|c| c.is_destructive())
    }

    /// Whether any durable state was changed.
    pub fn modified_anything(&self) -> bool {
        self.last_destructive().is_some()
    }

    /// State of each durable artifact after the operation, one line each.
    pub fn artifact_summary(&self, config: &SealKeyConfig) -> Vec<String> {
        vec![
            format!(
                "sealed keyfile {}: {}",
                config.sealed_keyfile.display(),
                self.sealed_keyfile_state()
            ),
            format!(
                "sealed-key slot {}: {}",
                config.sealed_slot,
                self.sealed_slot_state()
            ),
            format!("reset slot {}: {}", config.reset_slot, self.reset_slot_state()),
        ]
    }

    fn sealed_slot_state(&self) -> &'static str {
        if self.reached(Checkpoint::SealedSlotAdded) || self.reached(Checkpoint::SealedSlotChanged)
        {
            "holds the new key"
        } else if self.reached(Checkpoint::SealedSlotKilled) {
            "EMPTY (old key removed, new key not added)"
        } else {
            "unchanged"
        }
    }

    fn sealed_keyfile_state(&self) -> &'static str {
        if self.reached(Checkpoint::Sealed) {
            "sealed with the new key"
        } else if self.reached(Checkpoint::SealedSlotKilled)
            || self.reached(Checkpoint::SealedSlotChanged)
        {
            "STALE (holds a key that no longer unlocks the device)"
        } else {
            "unchanged"
        }
    }

    fn reset_slot_state(&self) -> &'static str {
        if self.reached(Checkpoint::ResetSlotKilled) {
            "cleared"
        } else if self.reached(Checkpoint::ResetSlotAdded) {
            "holds the temporary passphrase"
        } else if self.action == Action::Reset {
            "left intact (temporary passphrase still unlocks the device)"
        } else {
            "unchanged"
        }
    }
}
