//! Lifecycle contract shared by every node of the identity tree.
//!
//! Construction never touches a backend. All side effects happen inside
//! [`Entity::save`], [`Entity::force_save`] and [`Entity::delete`], each of
//! which is handed the backend explicitly.

use tracing::{debug, trace};

use vault_types::{Identity, Mechanism, Notification, StorageId};

use crate::error::StoreResult;
use crate::traits::StorageSystem;

pub trait Entity {
    fn storage_id(&self) -> Option<StorageId>;

    /// True once a backend has assigned this node an id.
    fn is_stored(&self) -> bool {
        self.storage_id().is_some()
    }

    /// Insert if not stored, otherwise update in place.
    ///
    /// Returns `Ok(false)` when the backend rejected the write on a
    /// constraint; the node is then left exactly as it was.
    fn save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool>;

    /// Insert unconditionally, ignoring any id from a previous backend.
    ///
    /// On rejection the node ends up unstored, since whatever id it held
    /// belongs to another backend.
    fn force_save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool>;

    /// Remove owned children, then this node. A no-op for unstored nodes.
    ///
    /// Returns `true` if any row was removed.
    fn delete(&mut self, store: &dyn StorageSystem) -> StoreResult<bool>;

    /// True only if this node and, recursively, every owned child is stored.
    fn validate(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

impl Entity for Identity {
    fn storage_id(&self) -> Option<StorageId> {
        Identity::storage_id(self)
    }

    /// Identities have no mutable persisted state beyond their key, so
    /// saving one that is already stored writes nothing.
    fn save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        if self.is_stored() {
            trace!(identity = %self.key(), "identity already stored");
            return Ok(true);
        }
        self.force_save(store)
    }

    fn force_save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        let id = store.add_identity(self)?;
        self.set_storage_id(id);
        if id.is_none() {
            debug!(identity = %self.key(), backend = store.name(), "identity insert rejected");
        }
        Ok(id.is_some())
    }

    fn delete(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        let mut removed = false;
        for mechanism in self.mechanisms_mut() {
            removed |= mechanism.delete(store)?;
        }
        if let Some(id) = Identity::storage_id(self) {
            removed |= store.delete_identity(id)?;
            self.set_storage_id(None);
        }
        Ok(removed)
    }

    fn validate(&self) -> bool {
        self.is_stored() && self.mechanisms().iter().all(Entity::validate)
    }
}

// ---------------------------------------------------------------------------
// Mechanism
// ---------------------------------------------------------------------------

impl Entity for Mechanism {
    fn storage_id(&self) -> Option<StorageId> {
        Mechanism::storage_id(self)
    }

    fn save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        match Mechanism::storage_id(self) {
            Some(id) => store.update_mechanism(id, self),
            None => self.force_save(store),
        }
    }

    fn force_save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        let id = store.add_mechanism(self)?;
        self.set_storage_id(id);
        if id.is_none() {
            debug!(mechanism = %self.key(), backend = store.name(), "mechanism insert rejected");
        }
        Ok(id.is_some())
    }

    fn delete(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        let mut removed = false;
        for notification in self.notifications_mut() {
            removed |= notification.delete(store)?;
        }
        if let Some(id) = Mechanism::storage_id(self) {
            removed |= store.delete_mechanism(id)?;
            self.set_storage_id(None);
        }
        Ok(removed)
    }

    fn validate(&self) -> bool {
        self.is_stored() && self.notifications().iter().all(Entity::validate)
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

impl Entity for Notification {
    fn storage_id(&self) -> Option<StorageId> {
        Notification::storage_id(self)
    }

    fn save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        match Notification::storage_id(self) {
            Some(id) => store.update_notification(id, self),
            None => self.force_save(store),
        }
    }

    fn force_save(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        let id = store.add_notification(self)?;
        self.set_storage_id(id);
        if id.is_none() {
            debug!(
                mechanism = %self.parent(),
                time_added = self.time_added().timestamp_millis(),
                backend = store.name(),
                "notification insert rejected"
            );
        }
        Ok(id.is_some())
    }

    fn delete(&mut self, store: &dyn StorageSystem) -> StoreResult<bool> {
        let Some(id) = Notification::storage_id(self) else {
            return Ok(false);
        };
        let removed = store.delete_notification(id)?;
        self.set_storage_id(None);
        Ok(removed)
    }

    fn validate(&self) -> bool {
        self.is_stored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStorage;
    use chrono::{TimeZone, Utc};
    use vault_types::{
        MechanismKind, OathMechanism, OathTokenType, PushMechanism, PushNotificationBuilder,
    };

    fn alice() -> Identity {
        Identity::new("ForgeRock", "alice").with_image_url("https://img.example/fr.png")
    }

    fn hotp(owner: &Identity, uid: &str) -> Mechanism {
        Mechanism::new(
            owner.key().clone(),
            uid,
            MechanismKind::Oath(OathMechanism::new(OathTokenType::Hotp, b"secret".to_vec())),
        )
    }

    fn push(owner: &Identity, uid: &str) -> Mechanism {
        Mechanism::new(
            owner.key().clone(),
            uid,
            MechanismKind::Push(PushMechanism {
                registration_endpoint: "https://idp.example/register".into(),
                authentication_endpoint: "https://idp.example/authenticate".into(),
                secret: "c2VjcmV0".into(),
            }),
        )
    }

    fn notification(mechanism: &Mechanism, ms: i64) -> Notification {
        mechanism
            .build_notification(
                PushNotificationBuilder::new()
                    .message_id(format!("msg-{ms}"))
                    .challenge("Y2hhbGxlbmdl")
                    .time_added(Utc.timestamp_millis_opt(ms).unwrap()),
            )
            .unwrap()
    }

    /// Store identity, one push mechanism and two notifications, and attach
    /// them into one tree.
    fn stored_tree(store: &SqliteStorage) -> Identity {
        let mut identity = alice();
        assert!(identity.save(store).unwrap());
        let mut mechanism = push(&identity, "0");
        assert!(mechanism.save(store).unwrap());
        for ms in [1_000, 2_000] {
            let mut n = notification(&mechanism, ms);
            assert!(n.save(store).unwrap());
            mechanism.push_notification(n);
        }
        identity.push_mechanism(mechanism);
        identity
    }

    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    #[test]
    fn saved_identity_reloads_equal() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = alice();
        assert!(!identity.is_stored());
        assert!(identity.save(&store).unwrap());
        assert!(identity.is_stored());
        assert_eq!(store.get_model().unwrap(), vec![identity]);
    }

    #[test]
    fn second_save_of_identity_writes_nothing() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = alice();
        identity.save(&store).unwrap();
        let id = identity.storage_id();
        assert!(identity.save(&store).unwrap());
        assert_eq!(identity.storage_id(), id);
        assert_eq!(store.counts().unwrap(), (1, 0, 0));
    }

    #[test]
    fn save_of_stored_mechanism_updates_in_place() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = alice();
        identity.save(&store).unwrap();
        let mut mechanism = hotp(&identity, "0");
        mechanism.save(&store).unwrap();

        if let MechanismKind::Oath(oath) = mechanism.kind_mut() {
            oath.advance_counter();
        }
        assert!(mechanism.save(&store).unwrap());
        assert_eq!(store.counts().unwrap(), (1, 1, 0));
        assert_eq!(store.get_model().unwrap()[0].mechanisms(), &[mechanism]);
    }

    #[test]
    fn duplicate_uid_is_rejected_without_error() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = alice();
        identity.save(&store).unwrap();
        let mut first = hotp(&identity, "7");
        assert!(first.save(&store).unwrap());
        let mut second = push(&identity, "7");
        assert!(!second.save(&store).unwrap());
        assert!(!second.is_stored());
        assert_eq!(store.counts().unwrap(), (1, 1, 0));
    }

    #[test]
    fn mechanism_needs_stored_owner() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut orphan = hotp(&alice(), "0");
        assert!(!orphan.save(&store).unwrap());
        assert!(!orphan.validate());
    }

    // -----------------------------------------------------------------------
    // Force save
    // -----------------------------------------------------------------------

    #[test]
    fn force_save_reinserts_into_another_backend() {
        let source = SqliteStorage::open_in_memory().unwrap();
        let target = SqliteStorage::open_in_memory().unwrap();
        let mut identity = stored_tree(&source);

        assert!(identity.force_save(&target).unwrap());
        for mechanism in identity.mechanisms_mut() {
            assert!(mechanism.force_save(&target).unwrap());
            for n in mechanism.notifications_mut() {
                assert!(n.force_save(&target).unwrap());
            }
        }
        assert_eq!(target.counts().unwrap(), (1, 1, 2));
        assert!(identity.validate());
    }

    #[test]
    fn rejected_force_save_clears_storage_id() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = alice();
        identity.save(&store).unwrap();
        let mut twin = alice().with_storage_id(StorageId::new(99));
        assert!(!twin.force_save(&store).unwrap());
        assert_eq!(twin.storage_id(), None);
    }

    // -----------------------------------------------------------------------
    // Delete and validate
    // -----------------------------------------------------------------------

    #[test]
    fn identity_delete_cascades() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = stored_tree(&store);
        assert_eq!(store.counts().unwrap(), (1, 1, 2));
        assert!(identity.validate());

        assert!(identity.delete(&store).unwrap());
        assert_eq!(store.counts().unwrap(), (0, 0, 0));
        assert!(!identity.is_stored());
        assert!(!identity.mechanisms()[0].is_stored());
        assert!(!identity.validate());
    }

    #[test]
    fn mechanism_delete_cascades_to_notifications() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = stored_tree(&store);
        assert!(identity.mechanisms_mut()[0].delete(&store).unwrap());
        assert_eq!(store.counts().unwrap(), (1, 0, 0));
    }

    #[test]
    fn delete_of_unstored_node_is_noop() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = alice();
        assert!(!identity.delete(&store).unwrap());
    }

    #[test]
    fn validate_fails_on_unstored_child() {
        let store = SqliteStorage::open_in_memory().unwrap();
        let mut identity = stored_tree(&store);
        let extra = notification(&identity.mechanisms()[0], 9_000);
        identity.mechanisms_mut()[0].push_notification(extra);
        assert!(!identity.validate());
    }
}
