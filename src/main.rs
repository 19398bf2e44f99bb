// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! tesseract-sealkey CLI - TPM-sealed LUKS key lifecycle
//!
//! # Usage
//!
//! ```bash
//! # Before a firmware or boot-loader update
//! tesseract-sealkey /dev/sda2 temp
//!
//! # After rebooting and unlocking with the temporary passphrase
//! tesseract-sealkey /dev/sda2 reset
//!
//! # Rotate the sealed key at any time
//! tesseract-sealkey /dev/sda2 replace
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning                                          |
//! |------|--------------------------------------------------|
//! | 0    | success                                          |
//! | 1    | usage or configuration error                     |
//! | 2    | not running as root                              |
//! | 3    | ephemeral key store could not be created         |
//! | 4    | reset incomplete                                 |
//! | 5    | temp failed                                      |
//! | 6    | replace failed before the slot changed           |
//! | 7    | replace changed the slot but could not seal      |
//! | 8    | another instance is running                      |

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tesseract_sealkey::config::{
    DEFAULT_MOUNT_PATH, DEFAULT_RESET_SLOT, DEFAULT_SEALED_KEYFILE, DEFAULT_SEALED_SLOT,
};
use tesseract_sealkey::error::EXIT_USAGE;
use tesseract_sealkey::hsm::DEFAULT_PCRS;
use tesseract_sealkey::lock::DEFAULT_LOCK_PATH;
use tesseract_sealkey::{
    privilege, Action, Checkpoint, Collaborators, CryptsetupSlots, KeySlot,
    LifecycleOrchestrator, OperationReport, OsRngGenerator, Outcome, SealKeyConfig,
    SealKeyError, SealPolicy, TerminalCredentials, TmpfsStore, TpmToolsSealer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tesseract Sealkey - TPM-sealed LUKS key management
#[derive(Parser, Debug)]
#[command(name = "tesseract-sealkey")]
#[command(author = "Tesseract Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage a TPM-sealed LUKS keyfile across platform updates")]
struct Cli {
    /// LUKS block device
    device: PathBuf,

    /// Operation: temp, reset or replace
    action: Action,

    /// Mount point of the ephemeral key store
    #[arg(short, long, default_value = DEFAULT_MOUNT_PATH)]
    mount: PathBuf,

    /// Sealed keyfile location
    #[arg(short, long, default_value = DEFAULT_SEALED_KEYFILE)]
    keyfile: PathBuf,

    /// Key slot holding the sealed key
    #[arg(short, long, default_value_t = DEFAULT_SEALED_SLOT,
          value_parser = clap::value_parser!(u8).range(0..=7))]
    slot: u8,

    /// Key slot holding the temporary passphrase
    #[arg(short, long, default_value_t = DEFAULT_RESET_SLOT,
          value_parser = clap::value_parser!(u8).range(0..=7))]
    reset_slot: u8,

    /// PCR to bind the sealed key to (repeatable, default 0-7)
    #[arg(short, long = "pcr", value_name = "PCR",
          value_parser = clap::value_parser!(u8).range(0..=23))]
    pcrs: Vec<u8>,

    /// Use the well-known SRK secret
    #[arg(short = 'z', long)]
    well_known: bool,

    /// Lock file guarding against concurrent runs
    #[arg(long, default_value = DEFAULT_LOCK_PATH)]
    lock_file: PathBuf,

    /// Run without taking the lock file
    #[arg(long)]
    no_lock: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not errors
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tesseract_sealkey=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn build_config(cli: &Cli) -> Result<SealKeyConfig, SealKeyError> {
    let pcrs: &[u8] = if cli.pcrs.is_empty() {
        &DEFAULT_PCRS
    } else {
        &cli.pcrs
    };

    let mut config = SealKeyConfig::new(&cli.device);
    config.mount_path = cli.mount.clone();
    config.sealed_keyfile = cli.keyfile.clone();
    config.sealed_slot = KeySlot::try_from(cli.slot)?;
    config.reset_slot = KeySlot::try_from(cli.reset_slot)?;
    config.policy = SealPolicy::new(pcrs, cli.well_known)?;
    config.lock_path = if cli.no_lock {
        None
    } else {
        Some(cli.lock_file.clone())
    };
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<u8, SealKeyError> {
    let config = build_config(&cli)?;
    privilege::require_root()?;

    let store = TmpfsStore::new(
        &config.mount_path,
        &config.tools.mount,
        &config.tools.umount,
    );
    let sealer = TpmToolsSealer::new(&config.tools.tpm_sealdata, &config.tools.tpm_unsealdata);
    let slots = CryptsetupSlots::new(&config.tools.cryptsetup);

    let orchestrator = LifecycleOrchestrator::new(
        config,
        Collaborators {
            store: &store,
            sealer: &sealer,
            slots: &slots,
            keygen: &OsRngGenerator,
        },
    );

    let report = orchestrator.run(cli.action, &mut TerminalCredentials)?;
    print_report(orchestrator.config(), &report);
    Ok(report.outcome.exit_code())
}

fn print_report(config: &SealKeyConfig, report: &OperationReport) {
    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }

    if let Some(failure) = &report.failure {
        eprintln!();
        eprintln!(
            "✗ {} failed at step '{}': {}",
            report.action, failure.step, failure.error
        );
        if report.modified_anything() {
            eprintln!("Current state:");
            for line in report.artifact_summary(config) {
                eprintln!("  {}", line);
            }
        } else {
            eprintln!("Nothing was modified.");
        }
    }

    let device = config.device.display();
    match (report.action, report.outcome) {
        (Action::Temp, Outcome::Success) => {
            eprintln!();
            eprintln!(
                "✓ Temporary passphrase added to key slot {}",
                config.reset_slot
            );
            eprintln!();
            eprintln!("Next steps:");
            eprintln!("  1. Apply the update and reboot");
            eprintln!("  2. Unlock the device with the temporary passphrase");
            eprintln!("  3. Run: tesseract-sealkey {} reset", device);
        }
        (Action::Reset, Outcome::Success) => {
            eprintln!();
            eprintln!(
                "✓ New key in slot {} sealed to {}",
                config.sealed_slot,
                config.sealed_keyfile.display()
            );
            if report.reached(Checkpoint::ResetSlotKilled) {
                eprintln!(
                    "✓ Temporary passphrase removed from slot {}",
                    config.reset_slot
                );
            }
        }
        (Action::Replace, Outcome::Success) => {
            eprintln!();
            eprintln!("✓ Sealed key in slot {} replaced", config.sealed_slot);
        }
        (Action::Reset, Outcome::ResetPartial) => {
            eprintln!();
            eprintln!(
                "The temporary passphrase in slot {} still unlocks the device.",
                config.reset_slot
            );
            eprintln!("Fix the problem above, then run: tesseract-sealkey {} reset", device);
        }
        (Action::Replace, Outcome::ReplaceSealFailed) => {
            eprintln!();
            eprintln!(
                "Slot {} holds a new key that is not sealed. The device will NOT unlock automatically.",
                config.sealed_slot
            );
            eprintln!("Make sure another key slot can unlock the device before rebooting.");
        }
        _ => {}
    }
}
