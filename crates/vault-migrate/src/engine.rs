//! One-shot, resumable migration from the legacy store to the relational
//! store.
//!
//! The migration is a set reconciliation rather than a transaction. Each
//! run moves forward from whatever state the previous run left behind:
//!
//! 1. Load the legacy tree and the relational tree as it stands now.
//! 2. Drop from the legacy store every leaf that already has a matching
//!    counterpart in the relational store.
//! 3. Force-insert what remains of the legacy tree into the relational
//!    store.
//! 4. Delete anything in the relational store that is neither original nor
//!    part of what was just transferred.
//! 5. Drain from the legacy store every mechanism the relational store now
//!    holds a match for.
//! 6. Advance the version marker only once the legacy store is empty.
//!
//! A record that cannot be decoded never loads, so it is never transferred
//! or drained. It stays put and holds the marker back until a later run
//! can deal with it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use vault_model::{IdentityModel, TransferReport};
use vault_store::{Entity, StorageSystem};
use vault_types::{Mechanism, MechanismKey, Referable};

use crate::error::MigrateResult;
use crate::leaf::{leaves, Leaf};
use crate::version::{StorageVersion, VersionMarker};

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// The marker already said the current version; nothing was touched.
    AlreadyCurrent,
    /// No marker and no legacy data: recorded as current.
    FreshInstall,
    /// Legacy store fully drained and marker advanced.
    Migrated,
    /// Some legacy entries remain; the next run resumes from here.
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub status: MigrationStatus,
    /// Legacy leaves dropped because the relational store already had them.
    pub pruned: usize,
    /// Legacy mechanisms given a new UID to avoid a clash.
    pub rekeyed: usize,
    pub transfer: Option<TransferReport>,
    /// Relational leaves deleted as unexpected.
    pub artifacts_removed: usize,
    /// Legacy mechanisms drained after transfer.
    pub drained: usize,
}

impl MigrationOutcome {
    fn new(status: MigrationStatus) -> Self {
        Self {
            status,
            pruned: 0,
            rekeyed: 0,
            transfer: None,
            artifacts_removed: 0,
            drained: 0,
        }
    }

    pub fn is_current(&self) -> bool {
        self.status != MigrationStatus::Incomplete
    }
}

/// Runs the V1 to V2 migration between two bound backends.
pub struct MigrationEngine {
    legacy: Arc<dyn StorageSystem>,
    current: Arc<dyn StorageSystem>,
    marker: Arc<dyn VersionMarker>,
}

impl MigrationEngine {
    pub fn new(
        legacy: Arc<dyn StorageSystem>,
        current: Arc<dyn StorageSystem>,
        marker: Arc<dyn VersionMarker>,
    ) -> Self {
        Self {
            legacy,
            current,
            marker,
        }
    }

    /// Bring storage up to [`StorageVersion::CURRENT`], as far as possible.
    ///
    /// Safe to call at the start of every session and safe to interrupt at
    /// any point.
    pub fn run(&self) -> MigrateResult<MigrationOutcome> {
        match self.marker.read()? {
            Some(StorageVersion::V2) => {
                debug!("storage already current");
                return Ok(MigrationOutcome::new(MigrationStatus::AlreadyCurrent));
            }
            Some(StorageVersion::V1) => {}
            None => {
                if self.legacy.is_empty()? {
                    info!("no legacy data, recording fresh install");
                    self.marker.write(StorageVersion::CURRENT)?;
                    return Ok(MigrationOutcome::new(MigrationStatus::FreshInstall));
                }
                info!("legacy data predates the version marker");
                self.marker.write(StorageVersion::V1)?;
            }
        }
        self.migrate_v1_to_v2()
    }

    fn migrate_v1_to_v2(&self) -> MigrateResult<MigrationOutcome> {
        let mut outcome = MigrationOutcome::new(MigrationStatus::Incomplete);

        let mut old_model = IdentityModel::load(Arc::clone(&self.legacy))?;
        let original = leaves(&self.current.get_model()?);
        let legacy_leaves = leaves(old_model.identities());
        info!(
            legacy = legacy_leaves.len(),
            relational = original.len(),
            "migrating legacy storage"
        );

        let matching: Vec<&Leaf> = legacy_leaves
            .iter()
            .filter(|l| original.iter().any(|o| l.matches(o)))
            .collect();
        for leaf in matching {
            if prune(&mut old_model, leaf)? {
                outcome.pruned += 1;
            }
        }
        info!(pruned = outcome.pruned, "dropped legacy entries already migrated");

        outcome.rekeyed = rekey_collisions(&mut old_model, &original);

        let report = old_model.transfer_storage(Arc::clone(&self.current))?;
        outcome.transfer = Some(report);

        let mut expected = leaves(old_model.identities());
        expected.extend(original);
        outcome.artifacts_removed = self.remove_unexpected(&expected)?;

        outcome.drained = self.drain_legacy()?;

        if self.legacy.is_empty()? {
            self.marker.write(StorageVersion::V2)?;
            outcome.status = MigrationStatus::Migrated;
            info!(drained = outcome.drained, "migration complete");
        } else {
            warn!(
                drained = outcome.drained,
                "legacy entries remain; migration will resume next session"
            );
        }
        Ok(outcome)
    }

    /// Delete relational leaves that are not strictly equal to an expected
    /// one. A mechanism's notifications go with it.
    fn remove_unexpected(&self, expected: &[Leaf]) -> MigrateResult<usize> {
        let store = self.current.as_ref();
        let mut removed = 0;
        for mut identity in self.current.get_model()? {
            for mechanism in identity.mechanisms_mut() {
                if !expected.contains(&Leaf::Mechanism(mechanism.clone())) {
                    warn!(mechanism = %mechanism.key(), "removing unexpected mechanism");
                    mechanism.delete(store)?;
                    removed += 1;
                    continue;
                }
                let parent = mechanism.clone();
                for notification in mechanism.notifications_mut() {
                    let leaf = Leaf::Notification {
                        parent: parent.clone(),
                        notification: notification.clone(),
                    };
                    if !expected.contains(&leaf) {
                        warn!(
                            notification = %notification.opaque_reference(),
                            "removing unexpected notification"
                        );
                        notification.delete(store)?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Remove from the legacy store every mechanism whose identity and type
    /// now exist in the relational store.
    fn drain_legacy(&self) -> MigrateResult<usize> {
        let current = IdentityModel::load(Arc::clone(&self.current))?;
        let mut legacy = IdentityModel::load(Arc::clone(&self.legacy))?;

        let migrated: Vec<MechanismKey> = legacy
            .identities()
            .iter()
            .filter_map(|identity| {
                let twin = current.identity(identity.key())?;
                Some(
                    identity
                        .mechanisms()
                        .iter()
                        .filter(|m| twin.mechanisms().iter().any(|t| t.matches(m)))
                        .map(Mechanism::key)
                        .collect::<Vec<_>>(),
                )
            })
            .flatten()
            .collect();

        let mut drained = 0;
        for key in migrated {
            if legacy.remove_mechanism(&key)? {
                debug!(mechanism = %key, "drained legacy mechanism");
                drained += 1;
            }
        }
        Ok(drained)
    }
}

/// Drop one matched leaf from the legacy model and its store.
fn prune(model: &mut IdentityModel, leaf: &Leaf) -> MigrateResult<bool> {
    let removed = match leaf {
        Leaf::Mechanism(mechanism) => model.remove_mechanism(&mechanism.key())?,
        Leaf::Notification { notification, .. } => {
            model.remove_notification(&notification.opaque_reference())?
        }
    };
    Ok(removed)
}

/// Give every legacy mechanism whose UID is already taken in the relational
/// store the first integer UID free in both.
fn rekey_collisions(model: &mut IdentityModel, original: &[Leaf]) -> usize {
    let taken: BTreeSet<&str> = original
        .iter()
        .filter_map(Leaf::as_mechanism)
        .map(Mechanism::uid)
        .collect();
    let colliding: Vec<MechanismKey> = model
        .mechanisms()
        .filter(|m| taken.contains(m.uid()))
        .map(Mechanism::key)
        .collect();

    let mut rekeyed = 0;
    for key in colliding {
        let Some(uid) = (0u64..)
            .map(|n| n.to_string())
            .find(|uid| !taken.contains(uid.as_str()) && model.mechanisms().all(|m| m.uid() != uid.as_str()))
        else {
            continue;
        };
        if model.relabel_mechanism(&key, &uid) {
            info!(mechanism = %key, uid = %uid, "re-keyed legacy mechanism");
            rekeyed += 1;
        }
    }
    rekeyed
}
