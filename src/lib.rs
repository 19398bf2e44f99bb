// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Tesseract Sealkey - TPM-sealed LUKS key management
//!
//! This library keeps a LUKS volume unlockable without operator input by
//! storing a random keyfile in one key slot and a TPM-sealed copy of that
//! keyfile on persistent storage. The sealed copy only unseals while the
//! platform's boot measurements match, so after a firmware or boot-loader
//! update the key has to be re-sealed.
//!
//! # Operations
//!
//! - **temp**: before a planned update, add a temporary passphrase to the
//!   reset slot so the next boot can be unlocked by hand
//! - **reset**: after the update, generate a new key, seal it against the new
//!   measurements and clear the temporary passphrase
//! - **replace**: rotate the sealed key without operator input
//!
//! # Safety properties
//!
//! - **No silent lockout**: a destructive step only runs after the steps it
//!   depends on succeeded, and the reset slot is only cleared once the new
//!   key is both in the header and sealed
//! - **Volatile cleartext**: keyfiles only exist in an ephemeral store that
//!   is scrubbed and removed when the operation ends
//! - **Secrets off the command line**: passphrases and keys reach external
//!   tools via stdin or files inside the store
//!
//! # Example
//!
//! ```no_run
//! use tesseract_sealkey::{
//!     Action, Collaborators, CryptsetupSlots, LifecycleOrchestrator, OsRngGenerator,
//!     SealKeyConfig, TerminalCredentials, TmpfsStore, TpmToolsSealer,
//! };
//!
//! let config = SealKeyConfig::new("/dev/sda2");
//! let store = TmpfsStore::detect(&config.mount_path);
//! let sealer = TpmToolsSealer::detect();
//! let slots = CryptsetupSlots::detect();
//!
//! let orchestrator = LifecycleOrchestrator::new(
//!     config,
//!     Collaborators {
//!         store: &store,
//!         sealer: &sealer,
//!         slots: &slots,
//!         keygen: &OsRngGenerator,
//!     },
//! );
//! let report = orchestrator.run(Action::Replace, &mut TerminalCredentials).unwrap();
//! std::process::exit(report.outcome.exit_code().into());
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod hsm;
pub mod keystore;
pub mod lifecycle;
pub mod lock;
pub mod luks;
pub mod privilege;
pub mod tools;
pub mod validation;

// Re-export commonly used types
pub use config::{SealKeyConfig, ToolPaths};
pub use crypto::{KeyfileGenerator, OsRngGenerator, KEYFILE_SIZE};
pub use error::{Result, SealKeyError};
pub use hsm::{SealPolicy, SealingGateway, TpmToolsSealer};
pub use keystore::{EphemeralStore, KeyStoreGuard, TmpfsStore};
pub use lifecycle::{
    Action, Checkpoint, Collaborators, LifecycleOrchestrator, OperationReport, Outcome,
};
pub use lock::OperationLock;
pub use luks::{Credential, CryptsetupSlots, KeySlot, SlotManager};
pub use validation::{CredentialProvider, TerminalCredentials};
