// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Test doubles for lifecycle tests
//!
//! - [`FakeHeader`]: eight in-memory key slots with cryptsetup's rules
//! - [`FakeTpm`]: seals to a simulated platform state and policy
//! - [`DirStore`]: plain directory standing in for the tmpfs key store
//!
//! Every double supports fault injection through `fail_*` flags.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tesseract_sealkey::{
    Action, Collaborators, Credential, CredentialProvider, EphemeralStore, KeySlot,
    KeyfileGenerator, LifecycleOrchestrator, OperationReport, OsRngGenerator, Result,
    SealKeyConfig, SealKeyError, SealPolicy, SealingGateway, SlotManager,
};
use zeroize::Zeroizing;

/// Passphrase in the administrator's slot.
pub const ADMIN_PASSPHRASE: &str = "admin passphrase";

/// Temporary passphrase entered during `temp`.
pub const TEMP_PASSPHRASE: &str = "temporary passphrase";

/// Keyfile installed in the sealed-key slot before each test.
pub const INITIAL_KEY: [u8; 64] = [0x5A; 64];

const BLOB_MAGIC: &[u8; 4] = b"FTPM";

/// In-memory LUKS header.
#[derive(Default)]
pub struct FakeHeader {
    slots: RefCell<[Option<Vec<u8>>; 8]>,
    pub fail_add: Cell<bool>,
    pub fail_kill: Cell<bool>,
    pub fail_change: Cell<bool>,
    pub mutations: Cell<u32>,
}

impl FakeHeader {
    pub fn slot(&self, index: u8) -> Option<Vec<u8>> {
        self.slots.borrow()[index as usize].clone()
    }

    pub fn set_slot(&self, index: u8, key: Option<Vec<u8>>) {
        self.slots.borrow_mut()[index as usize] = key;
    }

    pub fn snapshot(&self) -> [Option<Vec<u8>>; 8] {
        self.slots.borrow().clone()
    }

    /// Slot that `secret` unlocks, if any.
    pub fn unlocks(&self, secret: &[u8]) -> Option<u8> {
        self.slots
            .borrow()
            .iter()
            .position(|s| s.as_deref() == Some(secret))
            .map(|i| i as u8)
    }

    pub fn occupied(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.is_some()).count()
    }

    fn authorize(&self, auth: &Credential, except: Option<u8>) -> Result<()> {
        let secret = secret_of(auth)?;
        match self.unlocks(&secret) {
            Some(slot) if Some(slot) != except => Ok(()),
            _ => Err(SealKeyError::Slot("no key available with this passphrase".into())),
        }
    }

    fn mutated(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }
}

fn secret_of(credential: &Credential) -> Result<Vec<u8>> {
    match credential {
        Credential::Passphrase(p) => Ok(p.as_bytes().to_vec()),
        Credential::Keyfile(path) => Ok(fs::read(path)?),
    }
}

impl SlotManager for FakeHeader {
    fn add_key(
        &self,
        _device: &Path,
        slot: KeySlot,
        new_key: &Credential,
        auth: &Credential,
    ) -> Result<()> {
        if self.fail_add.get() {
            return Err(SealKeyError::Slot("add key: injected failure".into()));
        }
        self.authorize(auth, None)?;
        if self.slot(slot.index()).is_some() {
            return Err(SealKeyError::Slot(format!("add key: slot {} is in use", slot)));
        }
        self.set_slot(slot.index(), Some(secret_of(new_key)?));
        self.mutated();
        Ok(())
    }

    fn kill_slot(&self, _device: &Path, slot: KeySlot, auth: &Credential) -> Result<()> {
        if self.fail_kill.get() {
            return Err(SealKeyError::Slot("kill slot: injected failure".into()));
        }
        if self.slot(slot.index()).is_none() {
            return Err(SealKeyError::Slot(format!("kill slot: slot {} is not active", slot)));
        }
        self.authorize(auth, Some(slot.index()))?;
        self.set_slot(slot.index(), None);
        self.mutated();
        Ok(())
    }

    fn change_key(
        &self,
        _device: &Path,
        slot: KeySlot,
        new_keyfile: &Path,
        auth: &Credential,
    ) -> Result<()> {
        if self.fail_change.get() {
            return Err(SealKeyError::Slot("change key: injected failure".into()));
        }
        let current = secret_of(auth)?;
        if self.slot(slot.index()).as_deref() != Some(current.as_slice()) {
            return Err(SealKeyError::Slot(format!(
                "change key: key does not match slot {}",
                slot
            )));
        }
        self.set_slot(slot.index(), Some(fs::read(new_keyfile)?));
        self.mutated();
        Ok(())
    }
}

/// Sealing backend bound to a simulated platform state.
///
/// A blob only unseals while `platform` matches the value at seal time and
/// the same policy is presented.
#[derive(Default)]
pub struct FakeTpm {
    pub platform: Cell<u8>,
    pub fail_seal: Cell<bool>,
    pub seals: Cell<u32>,
}

impl FakeTpm {
    pub fn seal_bytes(&self, policy: &SealPolicy, key: &[u8]) -> Vec<u8> {
        let mut blob = BLOB_MAGIC.to_vec();
        blob.push(self.platform.get());
        blob.extend(policy_tag(policy));
        blob.extend_from_slice(key);
        blob
    }

    pub fn unseal_bytes(&self, policy: &SealPolicy, blob: &[u8]) -> Result<Vec<u8>> {
        let tag = policy_tag(policy);
        let header_len = BLOB_MAGIC.len() + 1 + tag.len();
        if blob.len() < header_len || &blob[..4] != BLOB_MAGIC {
            return Err(SealKeyError::Sealing("blob is corrupt".into()));
        }
        if blob[4] != self.platform.get() {
            return Err(SealKeyError::Sealing("PCR values do not match".into()));
        }
        if blob[5..header_len] != tag[..] {
            return Err(SealKeyError::Sealing("policy mismatch".into()));
        }
        Ok(blob[header_len..].to_vec())
    }
}

fn policy_tag(policy: &SealPolicy) -> Vec<u8> {
    let mut tag = vec![policy.well_known as u8, policy.pcrs().len() as u8];
    tag.extend(policy.pcrs().iter().map(|p| p.value()));
    tag
}

impl SealingGateway for FakeTpm {
    fn name(&self) -> &str {
        "fake-tpm"
    }

    fn seal(&self, policy: &SealPolicy, source: &Path, sealed: &Path) -> Result<()> {
        if self.fail_seal.get() {
            return Err(SealKeyError::Sealing("injected failure".into()));
        }
        let key = fs::read(source)?;
        fs::write(sealed, self.seal_bytes(policy, &key))?;
        self.seals.set(self.seals.get() + 1);
        Ok(())
    }

    fn unseal(&self, policy: &SealPolicy, sealed: &Path, dest: &Path) -> Result<()> {
        let blob = fs::read(sealed)
            .map_err(|e| SealKeyError::Sealing(format!("cannot read sealed keyfile: {}", e)))?;
        fs::write(dest, self.unseal_bytes(policy, &blob)?)?;
        Ok(())
    }
}

/// Key store backed by a plain directory.
pub struct DirStore {
    pub root: PathBuf,
    pub fail_acquire: Cell<bool>,
    pub acquired: Cell<u32>,
    pub released: Cell<u32>,
}

impl DirStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            fail_acquire: Cell::new(false),
            acquired: Cell::new(0),
            released: Cell::new(0),
        }
    }
}

impl EphemeralStore for DirStore {
    fn acquire(&self) -> Result<PathBuf> {
        if self.fail_acquire.get() {
            return Err(SealKeyError::KeyStore("mount: injected failure".into()));
        }
        if self.root.exists() {
            return Err(SealKeyError::KeyStore("store already exists".into()));
        }
        fs::create_dir(&self.root)?;
        self.acquired.set(self.acquired.get() + 1);
        Ok(self.root.clone())
    }

    fn release(&self) -> Result<()> {
        fs::remove_dir_all(&self.root)?;
        self.released.set(self.released.get() + 1);
        Ok(())
    }
}

/// OS RNG keyfiles with an injectable failure.
#[derive(Default)]
pub struct FakeKeygen {
    pub fail: Cell<bool>,
}

impl KeyfileGenerator for FakeKeygen {
    fn generate(&self, dest: &Path) -> Result<()> {
        if self.fail.get() {
            return Err(SealKeyError::Random("injected failure".into()));
        }
        OsRngGenerator.generate(dest)
    }
}

/// Canned operator input. `None` simulates an aborted prompt.
pub struct Canned {
    pub existing: Option<&'static str>,
    pub new: Option<&'static str>,
}

impl Canned {
    pub fn existing(passphrase: &'static str) -> Self {
        Self {
            existing: Some(passphrase),
            new: None,
        }
    }

    pub fn temp(passphrase: &'static str) -> Self {
        Self {
            existing: None,
            new: Some(passphrase),
        }
    }

    pub fn none() -> Self {
        Self {
            existing: None,
            new: None,
        }
    }
}

impl CredentialProvider for Canned {
    fn existing_passphrase(&mut self) -> Result<Zeroizing<String>> {
        self.existing
            .map(|p| Zeroizing::new(p.to_string()))
            .ok_or_else(|| SealKeyError::Credential("prompt aborted".into()))
    }

    fn new_passphrase(&mut self) -> Result<Zeroizing<String>> {
        self.new
            .map(|p| Zeroizing::new(p.to_string()))
            .ok_or_else(|| SealKeyError::Credential("prompt aborted".into()))
    }
}

/// A device with an admin passphrase, a sealed key and its sealed copy.
pub struct Fixture {
    pub dir: TempDir,
    pub config: SealKeyConfig,
    pub header: FakeHeader,
    pub tpm: FakeTpm,
    pub store: DirStore,
    pub keygen: FakeKeygen,
    pub admin_slot: u8,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_slots(1, 2)
    }

    pub fn with_slots(sealed: u8, reset: u8) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = SealKeyConfig::new(dir.path().join("disk.img"));
        config.mount_path = dir.path().join("keyfs");
        config.sealed_keyfile = dir.path().join("keyfile.enc");
        config.sealed_slot = KeySlot::try_from(sealed).unwrap();
        config.reset_slot = KeySlot::try_from(reset).unwrap();
        config.lock_path = Some(dir.path().join("sealkey.lock"));
        fs::write(&config.device, b"").unwrap();

        let header = FakeHeader::default();
        let admin_slot = (0..8).find(|s| *s != sealed && *s != reset).unwrap();
        header.set_slot(admin_slot, Some(ADMIN_PASSPHRASE.as_bytes().to_vec()));
        header.set_slot(sealed, Some(INITIAL_KEY.to_vec()));

        let tpm = FakeTpm::default();
        fs::write(&config.sealed_keyfile, tpm.seal_bytes(&config.policy, &INITIAL_KEY)).unwrap();

        let store = DirStore::new(config.mount_path.clone());

        Self {
            dir,
            config,
            header,
            tpm,
            store,
            keygen: FakeKeygen::default(),
            admin_slot,
        }
    }

    pub fn run(&self, action: Action, credentials: &mut Canned) -> Result<OperationReport> {
        let orchestrator = LifecycleOrchestrator::new(
            self.config.clone(),
            Collaborators {
                store: &self.store,
                sealer: &self.tpm,
                slots: &self.header,
                keygen: &self.keygen,
            },
        );
        orchestrator.run(action, credentials)
    }

    pub fn sealed_slot(&self) -> u8 {
        self.config.sealed_slot.index()
    }

    pub fn reset_slot(&self) -> u8 {
        self.config.reset_slot.index()
    }

    pub fn blob(&self) -> Vec<u8> {
        fs::read(&self.config.sealed_keyfile).unwrap()
    }

    /// Key the sealed keyfile yields on the current platform, if it unseals.
    pub fn unsealed_key(&self) -> Option<Vec<u8>> {
        self.tpm.unseal_bytes(&self.config.policy, &self.blob()).ok()
    }

    /// Simulate a firmware or boot-loader update.
    pub fn update_platform(&self) {
        self.tpm.platform.set(self.tpm.platform.get().wrapping_add(1));
    }

    pub fn store_exists(&self) -> bool {
        self.config.mount_path.exists()
    }
}
