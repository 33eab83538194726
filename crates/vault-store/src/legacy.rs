//! First-generation key/value backend.
//!
//! The legacy format is one ordered list of account keys plus one JSON
//! record per key. Each record fuses an identity with exactly one OATH
//! mechanism; there is no notion of push mechanisms or notifications.
//!
//! Positions in the key list are the storage ids. Deleting an entry blanks
//! its slot (an empty string) instead of shrinking the list, so surviving
//! positions stay valid. Only trailing blanks are trimmed.
//!
//! This backend exists to be read and drained. It never accepts writes.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vault_types::{
    Identity, IdentityKey, Mechanism, MechanismKind, Notification, OathMechanism, OathTokenType,
    StorageId, TypeError,
};

use crate::error::{StoreError, StoreResult};
use crate::traits::StorageSystem;

/// The whole legacy store: key list plus per-key records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDocument {
    #[serde(rename = "accountList", default)]
    pub account_list: Vec<String>,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl LegacyDocument {
    /// Append a record under `key`, as the first-generation app would have.
    pub fn with_record(mut self, key: impl Into<String>, record: &LegacyRecord) -> StoreResult<Self> {
        let key = key.into();
        self.entries.insert(key.clone(), record.encode()?);
        self.account_list.push(key);
        Ok(self)
    }

    /// Append a raw, possibly malformed, blob under `key`.
    pub fn with_raw_entry(mut self, key: impl Into<String>, blob: impl Into<String>) -> Self {
        let key = key.into();
        self.entries.insert(key.clone(), blob.into());
        self.account_list.push(key);
        self
    }

    /// Number of occupied slots.
    pub fn live_slots(&self) -> usize {
        self.account_list.iter().filter(|k| !k.is_empty()).count()
    }

    /// True when nothing remains: no live slot and no stored record.
    pub fn is_drained(&self) -> bool {
        self.live_slots() == 0 && self.entries.is_empty()
    }

    fn blank_slot(&mut self, slot: usize) -> bool {
        let Some(key) = self.account_list.get_mut(slot) else {
            return false;
        };
        if key.is_empty() {
            return false;
        }
        let key = std::mem::take(key);
        self.entries.remove(&key);
        while self.account_list.last().is_some_and(String::is_empty) {
            self.account_list.pop();
        }
        if self.account_list.is_empty() && !self.entries.is_empty() {
            debug!(count = self.entries.len(), "dropping unreferenced legacy entries");
            self.entries.clear();
        }
        true
    }
}

/// One serialized legacy account: an identity fused with an OATH token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRecord {
    pub issuer: String,
    pub account_name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub algorithm: String,
    pub counter: u64,
    pub digits: u32,
    pub period: u32,
    pub secret: Vec<u8>,
    /// `HOTP` or `TOTP`.
    #[serde(rename = "type")]
    pub token_type: String,
}

impl LegacyRecord {
    pub fn encode(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(blob: &str) -> Result<Self, TypeError> {
        serde_json::from_str(blob).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Split into the identity and mechanism it stands for.
    ///
    /// Both take the slot position as storage id, and the mechanism takes it
    /// as UID as well.
    fn into_entities(self, slot: usize) -> Result<(Identity, Mechanism), TypeError> {
        let token_type: OathTokenType = self.token_type.parse()?;
        let id = StorageId::new(slot as i64);
        let mut identity = Identity::new(self.issuer, self.account_name).with_storage_id(id);
        if let Some(url) = self.image_url {
            identity = identity.with_image_url(url);
        }
        let kind = MechanismKind::Oath(OathMechanism {
            token_type,
            algorithm: self.algorithm,
            secret: self.secret,
            digits: self.digits,
            counter: self.counter,
            period: self.period,
        });
        let mechanism = Mechanism::new(identity.key().clone(), slot.to_string(), kind).with_storage_id(id);
        Ok((identity, mechanism))
    }
}

/// Read-and-drain backend over a [`LegacyDocument`].
///
/// The document lives in memory and, when opened from a path, is rewritten
/// to that file after every delete.
pub struct LegacyStorage {
    path: Option<PathBuf>,
    document: RwLock<LegacyDocument>,
}

impl LegacyStorage {
    /// Open the JSON file at `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let document = if path.exists() {
            let bytes = fs::read(path)?;
            serde_json::from_slice(&bytes)?
        } else {
            LegacyDocument::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            document: RwLock::new(document),
        })
    }

    pub fn in_memory(document: LegacyDocument) -> Self {
        Self {
            path: None,
            document: RwLock::new(document),
        }
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> StoreResult<LegacyDocument> {
        let doc = self
            .document
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(doc.clone())
    }

    fn blank_slot(&self, id: StorageId) -> StoreResult<bool> {
        let Ok(slot) = usize::try_from(id.get()) else {
            return Ok(false);
        };
        let mut doc = self
            .document
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        if !doc.blank_slot(slot) {
            return Ok(false);
        }
        self.persist(&doc)?;
        debug!(slot, "blanked legacy slot");
        Ok(true)
    }

    /// Rewrite the backing file via a temporary sibling and rename.
    fn persist(&self, doc: &LegacyDocument) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(doc)?)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl std::fmt::Debug for LegacyStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StorageSystem for LegacyStorage {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn get_model(&self) -> StoreResult<Vec<Identity>> {
        let doc = self
            .document
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        let mut loaded: BTreeMap<IdentityKey, Vec<(usize, Identity, Mechanism)>> = BTreeMap::new();
        for (slot, key) in doc.account_list.iter().enumerate() {
            if key.is_empty() {
                continue;
            }
            let Some(blob) = doc.entries.get(key) else {
                warn!(slot, key = %key, "legacy slot has no record");
                continue;
            };
            let (identity, mechanism) = match LegacyRecord::decode(blob).and_then(|r| r.into_entities(slot)) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(slot, key = %key, error = %e, "skipping malformed legacy record");
                    continue;
                }
            };
            loaded
                .entry(identity.key().clone())
                .or_default()
                .push((slot, identity, mechanism));
        }

        // The format holds one mechanism per account. Several live slots for
        // the same account cannot be told apart from a resumed transfer, so
        // none of them load and all stay where they are.
        let mut identities = Vec::with_capacity(loaded.len());
        for (natural_key, mut slots) in loaded {
            if slots.len() > 1 {
                let positions: Vec<usize> = slots.iter().map(|(slot, _, _)| *slot).collect();
                warn!(identity = %natural_key, slots = ?positions, "skipping legacy account stored in several slots");
                continue;
            }
            if let Some((_, mut identity, mechanism)) = slots.pop() {
                identity.push_mechanism(mechanism);
                identities.push(identity);
            }
        }
        Ok(identities)
    }

    fn add_identity(&self, _identity: &Identity) -> StoreResult<Option<StorageId>> {
        Err(StoreError::ReadOnly)
    }

    fn add_mechanism(&self, _mechanism: &Mechanism) -> StoreResult<Option<StorageId>> {
        Err(StoreError::ReadOnly)
    }

    fn add_notification(&self, _notification: &Notification) -> StoreResult<Option<StorageId>> {
        Err(StoreError::ReadOnly)
    }

    fn update_mechanism(&self, _id: StorageId, _mechanism: &Mechanism) -> StoreResult<bool> {
        Err(StoreError::ReadOnly)
    }

    fn update_notification(&self, _id: StorageId, _notification: &Notification) -> StoreResult<bool> {
        Err(StoreError::ReadOnly)
    }

    /// An identity shares its slot with its mechanism.
    fn delete_identity(&self, id: StorageId) -> StoreResult<bool> {
        self.blank_slot(id)
    }

    fn delete_mechanism(&self, id: StorageId) -> StoreResult<bool> {
        self.blank_slot(id)
    }

    fn delete_notification(&self, _id: StorageId) -> StoreResult<bool> {
        Ok(false)
    }

    fn is_empty(&self) -> StoreResult<bool> {
        let doc = self
            .document
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(doc.live_slots() == 0)
    }
}
