// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Sealed-key lifecycle orchestration
//!
//! Three operations manage the key that lets a LUKS volume unlock without
//! operator input:
//!
//! ```text
//! temp     unseal current key ──► add temporary passphrase to reset slot
//!
//! reset    passphrase + new key ──► kill sealed slot ──► add new key
//!                                   ──► seal new key ──► kill reset slot
//!
//! replace  unseal current key + new key ──► change sealed slot ──► seal new key
//! ```
//!
//! Each step's result is checked before the next one runs. A destructive
//! step is skipped when an earlier step it depends on failed; nothing is
//! ever rolled back. The [`OperationReport`] records what completed so the
//! operator knows which artifact is in which state.
//!
//! Every operation runs inside a scoped ephemeral key store, so cleartext
//! keyfiles never outlive the operation, whatever its outcome.

mod outcome;

pub use outcome::{Action, Checkpoint, Outcome, OperationReport, StepFailure};

use crate::config::SealKeyConfig;
use crate::crypto::KeyfileGenerator;
use crate::error::{Result, SealKeyError};
use crate::hsm::SealingGateway;
use crate::keystore::{EphemeralStore, KeyStoreGuard};
use crate::lock::OperationLock;
use crate::luks::{Credential, SlotManager};
use crate::validation::CredentialProvider;

/// Capabilities the orchestrator drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Scoped volatile storage for cleartext keys
    pub store: &'a dyn EphemeralStore,
    /// Hardware seal / unseal
    pub sealer: &'a dyn SealingGateway,
    /// LUKS header key slots
    pub slots: &'a dyn SlotManager,
    /// Source of fresh keyfiles
    pub keygen: &'a dyn KeyfileGenerator,
}

/// Runs lifecycle operations against one device.
pub struct LifecycleOrchestrator<'a> {
    config: SealKeyConfig,
    deps: Collaborators<'a>,
}

impl<'a> LifecycleOrchestrator<'a> {
    /// Orchestrator for `config`, driving `deps`.
    pub fn new(config: SealKeyConfig, deps: Collaborators<'a>) -> Self {
        Self { config, deps }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SealKeyConfig {
        &self.config
    }

    /// Runs `action`.
    ///
    /// Takes the operation lock (when configured), acquires the key store,
    /// runs the operation and releases the store again. Step failures are
    /// reported through the returned [`OperationReport`]'s outcome.
    ///
    /// # Errors
    ///
    /// Only failures before the operation starts: [`SealKeyError::Locked`]
    /// when another instance is running, [`SealKeyError::KeyStore`] when the
    /// key store cannot be created.
    pub fn run(
        &self,
        action: Action,
        credentials: &mut dyn CredentialProvider,
    ) -> Result<OperationReport> {
        let _lock = match &self.config.lock_path {
            Some(path) => Some(OperationLock::acquire(path)?),
            None => None,
        };

        let guard = KeyStoreGuard::acquire(self.deps.store).map_err(|e| match e {
            SealKeyError::KeyStore(_) => e,
            other => SealKeyError::KeyStore(other.to_string()),
        })?;

        tracing::info!(
            %action,
            device = %self.config.device.display(),
            sealer = self.deps.sealer.name(),
            "starting operation"
        );

        let mut report = OperationReport::new(action);
        report.record(Checkpoint::StoreAcquired);

        report.outcome = match action {
            Action::Temp => self.temp(&guard, credentials, &mut report),
            Action::Reset => self.reset(&guard, credentials, &mut report),
            Action::Replace => self.replace(&guard, &mut report),
        };

        match guard.release() {
            Ok(()) => report.record(Checkpoint::StoreReleased),
            Err(e) => {
                tracing::error!(error = %e, "failed to release ephemeral key store");
                report.warn(format!(
                    "ephemeral key store at {} was not released: {}",
                    self.config.mount_path.display(),
                    e
                ));
            }
        }

        if report.outcome.is_success() {
            tracing::info!(%action, "operation completed");
        } else {
            tracing::error!(
                %action,
                exit_code = report.outcome.exit_code(),
                "operation failed"
            );
        }
        Ok(report)
    }

    /// Adds a temporary passphrase to the reset slot, authorized by the
    /// unsealed current key. The sealed-key slot is never touched.
    fn temp(
        &self,
        store: &KeyStoreGuard<'_>,
        credentials: &mut dyn CredentialProvider,
        report: &mut OperationReport,
    ) -> Outcome {
        let cfg = &self.config;
        let original = store.original_keyfile();

        if let Err(e) = self
            .deps
            .sealer
            .unseal(&cfg.policy, &cfg.sealed_keyfile, &original)
        {
            tracing::error!(error = %e, "unseal failed");
            report.fail("unseal current key", e);
            return Outcome::TempFailed;
        }
        report.record(Checkpoint::Unsealed);

        let passphrase = match credentials.new_passphrase() {
            Ok(p) => p,
            Err(e) => {
                report.fail("read temporary passphrase", e);
                return Outcome::TempFailed;
            }
        };
        report.record(Checkpoint::PassphraseCollected);

        let new_key = Credential::Passphrase(passphrase);
        let auth = Credential::Keyfile(original);
        if let Err(e) = self
            .deps
            .slots
            .add_key(&cfg.device, cfg.reset_slot, &new_key, &auth)
        {
            tracing::error!(slot = %cfg.reset_slot, error = %e, "adding temporary passphrase failed");
            report.fail("add temporary passphrase", e);
            return Outcome::TempFailed;
        }
        report.record(Checkpoint::ResetSlotAdded);
        tracing::info!(slot = %cfg.reset_slot, "temporary passphrase added");

        Outcome::Success
    }

    /// Replaces the sealed key using an operator passphrase, then clears the
    /// reset slot once the new key is both in the header and sealed.
    fn reset(
        &self,
        store: &KeyStoreGuard<'_>,
        credentials: &mut dyn CredentialProvider,
        report: &mut OperationReport,
    ) -> Outcome {
        let cfg = &self.config;
        let slots = self.deps.slots;

        let passphrase = match credentials.existing_passphrase() {
            Ok(p) => p,
            Err(e) => {
                report.fail("read existing passphrase", e);
                return Outcome::ResetPartial;
            }
        };
        let auth = Credential::Passphrase(passphrase);
        report.record(Checkpoint::PassphraseCollected);

        let new_keyfile = store.new_keyfile();
        if let Err(e) = self.deps.keygen.generate(&new_keyfile) {
            tracing::error!(error = %e, "keyfile generation failed");
            report.fail("generate keyfile", e);
            return Outcome::ResetPartial;
        }
        report.record(Checkpoint::KeyGenerated);

        // An already empty slot is expected after an earlier partial reset
        let killed = match slots.kill_slot(&cfg.device, cfg.sealed_slot, &auth) {
            Ok(()) => {
                report.record(Checkpoint::SealedSlotKilled);
                tracing::info!(slot = %cfg.sealed_slot, "old sealed key removed");
                true
            }
            Err(e) => {
                tracing::warn!(slot = %cfg.sealed_slot, error = %e, "removing old sealed key failed, continuing");
                report.warn(format!(
                    "could not clear sealed-key slot {}: {}",
                    cfg.sealed_slot, e
                ));
                false
            }
        };

        let new_key = Credential::Keyfile(new_keyfile.clone());
        let added = match slots.add_key(&cfg.device, cfg.sealed_slot, &new_key, &auth) {
            Ok(()) => {
                report.record(Checkpoint::SealedSlotAdded);
                tracing::info!(slot = %cfg.sealed_slot, "new key added");
                true
            }
            Err(e) => {
                tracing::error!(slot = %cfg.sealed_slot, error = %e, "adding new key failed");
                report.fail("add new key", e);
                false
            }
        };

        // With the header untouched the old blob still unlocks the device
        let sealed = (killed || added)
            && match self
                .deps
                .sealer
                .seal(&cfg.policy, &new_keyfile, &cfg.sealed_keyfile)
            {
                Ok(()) => {
                    report.record(Checkpoint::Sealed);
                    tracing::info!(path = %cfg.sealed_keyfile.display(), "new key sealed");
                    true
                }
                Err(e) => {
                    tracing::error!(error = %e, "sealing new key failed");
                    report.fail("seal new key", e);
                    false
                }
            };

        if !(added && sealed) {
            tracing::warn!(slot = %cfg.reset_slot, "reset incomplete, reset slot left intact");
            return Outcome::ResetPartial;
        }

        match slots.kill_slot(&cfg.device, cfg.reset_slot, &new_key) {
            Ok(()) => {
                report.record(Checkpoint::ResetSlotKilled);
                tracing::info!(slot = %cfg.reset_slot, "reset slot cleared");
            }
            Err(e) => {
                tracing::warn!(slot = %cfg.reset_slot, error = %e, "clearing reset slot failed");
                report.warn(format!(
                    "could not clear reset slot {} (it may already be empty): {}",
                    cfg.reset_slot, e
                ));
            }
        }

        Outcome::Success
    }

    /// Swaps the sealed key for a fresh one, authorized by the unsealed
    /// current key. Needs no operator input.
    fn replace(&self, store: &KeyStoreGuard<'_>, report: &mut OperationReport) -> Outcome {
        let cfg = &self.config;
        let original = store.original_keyfile();
        let new_keyfile = store.new_keyfile();

        if let Err(e) = self
            .deps
            .sealer
            .unseal(&cfg.policy, &cfg.sealed_keyfile, &original)
        {
            tracing::error!(error = %e, "unseal failed");
            report.fail("unseal current key", e);
            return Outcome::ReplaceSlotChangeFailed;
        }
        report.record(Checkpoint::Unsealed);

        if let Err(e) = self.deps.keygen.generate(&new_keyfile) {
            tracing::error!(error = %e, "keyfile generation failed");
            report.fail("generate keyfile", e);
            return Outcome::ReplaceSlotChangeFailed;
        }
        report.record(Checkpoint::KeyGenerated);

        let auth = Credential::Keyfile(original);
        if let Err(e) = self
            .deps
            .slots
            .change_key(&cfg.device, cfg.sealed_slot, &new_keyfile, &auth)
        {
            tracing::error!(slot = %cfg.sealed_slot, error = %e, "changing sealed key failed");
            report.fail("change sealed key", e);
            return Outcome::ReplaceSlotChangeFailed;
        }
        report.record(Checkpoint::SealedSlotChanged);
        tracing::info!(slot = %cfg.sealed_slot, "sealed-key slot now holds the new key");

        if let Err(e) = self
            .deps
            .sealer
            .seal(&cfg.policy, &new_keyfile, &cfg.sealed_keyfile)
        {
            tracing::error!(error = %e, "sealing new key failed");
            report.fail("seal new key", e);
            report.warn(format!(
                "slot {} holds a key that is not sealed; the device will not unlock automatically",
                cfg.sealed_slot
            ));
            return Outcome::ReplaceSealFailed;
        }
        report.record(Checkpoint::Sealed);
        tracing::info!(path = %cfg.sealed_keyfile.display(), "new key sealed");

        Outcome::Success
    }
}
