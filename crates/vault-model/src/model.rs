//! The aggregate root over one storage backend.
//!
//! [`IdentityModel`] loads the whole tree once, checks that every node is
//! backend-resident, and from then on changes the tree and the backend
//! together through the entity contract.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use vault_store::{Entity, StorageSystem};
use vault_types::{
    Identity, IdentityKey, Mechanism, MechanismKey, Notification, OpaqueReference,
    PushNotificationBuilder, Referable,
};

use crate::error::{ModelError, ModelResult};
use crate::event::{ListenerId, ListenerSet, ModelEvent, ModelListener};

/// A tree node resolved from an [`OpaqueReference`].
#[derive(Clone, Copy, Debug)]
pub enum Node<'a> {
    Identity(&'a Identity),
    Mechanism(&'a Mechanism),
    Notification(&'a Notification),
}

/// Index path to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Location {
    identity: usize,
    mechanism: Option<usize>,
    notification: Option<usize>,
}

/// Accepted and rejected inserts at one tree level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LevelCount {
    pub accepted: usize,
    pub rejected: usize,
}

impl LevelCount {
    fn record(&mut self, accepted: bool) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// Result of [`IdentityModel::transfer_storage`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub identities: LevelCount,
    pub mechanisms: LevelCount,
    pub notifications: LevelCount,
}

impl TransferReport {
    pub fn rejected(&self) -> usize {
        self.identities.rejected + self.mechanisms.rejected + self.notifications.rejected
    }

    pub fn is_complete(&self) -> bool {
        self.rejected() == 0
    }
}

/// The in-memory identity tree bound to one storage backend.
///
/// Every read is served from memory; every write goes through the
/// [`Entity`] contract to the bound backend first and only then touches the
/// tree. A write the backend rejects leaves the tree unchanged.
///
/// The model assumes a single writer. Listener callbacks run synchronously
/// on the calling thread; use [`ChannelListener`](crate::ChannelListener)
/// to hand events to another thread.
pub struct IdentityModel {
    storage: Arc<dyn StorageSystem>,
    identities: Vec<Identity>,
    listeners: ListenerSet,
}

impl IdentityModel {
    /// Load the full tree from `storage` and check that every node in it is
    /// actually stored there.
    pub fn load(storage: Arc<dyn StorageSystem>) -> ModelResult<Self> {
        let mut identities = storage.get_model()?;
        identities.sort_by(Identity::cmp_natural);
        if let Some(bad) = identities.iter().find(|i| !i.validate()) {
            return Err(ModelError::Corrupt(first_unstored(bad).to_string()));
        }
        info!(
            backend = storage.name(),
            identities = identities.len(),
            "identity model loaded"
        );
        Ok(Self {
            storage,
            identities,
            listeners: ListenerSet::default(),
        })
    }

    pub fn storage(&self) -> &Arc<dyn StorageSystem> {
        &self.storage
    }

    // ---- Lookups ----

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn identity(&self, key: &IdentityKey) -> Option<&Identity> {
        self.identities.iter().find(|i| i.key() == key)
    }

    pub fn mechanism(&self, key: &MechanismKey) -> Option<&Mechanism> {
        self.identity(&key.owner)?.mechanism(&key.uid)
    }

    /// Every mechanism in the tree, in tree order.
    pub fn mechanisms(&self) -> impl Iterator<Item = &Mechanism> {
        self.identities.iter().flat_map(|i| i.mechanisms())
    }

    /// Every notification in the tree, in tree order.
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.mechanisms().flat_map(|m| m.notifications())
    }

    pub fn resolve(&self, reference: &OpaqueReference) -> Option<Node<'_>> {
        let location = self.locate(reference)?;
        let identity = &self.identities[location.identity];
        let Some(m) = location.mechanism else {
            return Some(Node::Identity(identity));
        };
        let mechanism = &identity.mechanisms()[m];
        match location.notification {
            Some(n) => Some(Node::Notification(&mechanism.notifications()[n])),
            None => Some(Node::Mechanism(mechanism)),
        }
    }

    pub fn identity_by_reference(&self, reference: &OpaqueReference) -> Option<&Identity> {
        match self.resolve(reference)? {
            Node::Identity(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn mechanism_by_reference(&self, reference: &OpaqueReference) -> Option<&Mechanism> {
        match self.resolve(reference)? {
            Node::Mechanism(mechanism) => Some(mechanism),
            _ => None,
        }
    }

    pub fn notification_by_reference(&self, reference: &OpaqueReference) -> Option<&Notification> {
        match self.resolve(reference)? {
            Node::Notification(notification) => Some(notification),
            _ => None,
        }
    }

    /// First non-negative integer, as a string, not used as a mechanism UID.
    pub fn next_mechanism_uid(&self) -> String {
        let used: BTreeSet<&str> = self.mechanisms().map(Mechanism::uid).collect();
        (0u64..)
            .map(|n| n.to_string())
            .find(|uid| !used.contains(uid.as_str()))
            .unwrap_or_default()
    }

    // ---- Identity mutations ----

    /// Store `identity` together with any children it carries and add it to
    /// the tree.
    ///
    /// Returns `Ok(None)` if the backend rejected any part of it; whatever
    /// was written is rolled back and the tree is unchanged.
    pub fn add_identity(&mut self, mut identity: Identity) -> ModelResult<Option<OpaqueReference>> {
        if self.identity(identity.key()).is_some() {
            debug!(identity = %identity.key(), "identity already in model");
            return Ok(None);
        }
        let store = self.storage.as_ref();
        if !identity.save(store)? {
            return Ok(None);
        }
        if !save_children(&mut identity, store)? {
            identity.delete(store)?;
            return Ok(None);
        }

        let reference = identity.opaque_reference();
        let added = notification_references(std::slice::from_ref(&identity));
        let index = self
            .identities
            .binary_search_by(|i| i.cmp_natural(&identity))
            .unwrap_or_else(|i| i);
        self.identities.insert(index, identity);
        for r in added {
            self.listeners.emit(&ModelEvent::NotificationAdded(r));
        }
        Ok(Some(reference))
    }

    /// Delete an identity and everything it owns. `Ok(false)` if absent.
    pub fn remove_identity(&mut self, key: &IdentityKey) -> ModelResult<bool> {
        let Some(index) = self.identities.iter().position(|i| i.key() == key) else {
            return Ok(false);
        };
        self.identities[index].delete(self.storage.as_ref())?;
        let identity = self.identities.remove(index);
        debug!(identity = %key, "identity removed");
        for r in notification_references(std::slice::from_ref(&identity)) {
            self.listeners.emit(&ModelEvent::NotificationRemoved(r));
        }
        Ok(true)
    }

    // ---- Mechanism mutations ----

    /// Store `mechanism` under its owner, which must already be in the tree.
    pub fn add_mechanism(&mut self, mut mechanism: Mechanism) -> ModelResult<Option<OpaqueReference>> {
        let index = self.identity_index(mechanism.owner())?;
        let store = self.storage.as_ref();
        if !mechanism.save(store)? {
            return Ok(None);
        }
        for notification in mechanism.notifications_mut() {
            if !notification.save(store)? {
                mechanism.delete(store)?;
                return Ok(None);
            }
        }

        let reference = mechanism.opaque_reference();
        let added: Vec<_> = mechanism
            .notifications()
            .iter()
            .map(Referable::opaque_reference)
            .collect();
        self.identities[index].push_mechanism(mechanism);
        for r in added {
            self.listeners.emit(&ModelEvent::NotificationAdded(r));
        }
        Ok(Some(reference))
    }

    /// Delete a mechanism and its notifications. `Ok(false)` if absent.
    pub fn remove_mechanism(&mut self, key: &MechanismKey) -> ModelResult<bool> {
        let Ok(index) = self.identity_index(&key.owner) else {
            return Ok(false);
        };
        let store = self.storage.as_ref();
        let identity = &mut self.identities[index];
        let Some(mechanism) = identity.mechanism_mut(&key.uid) else {
            return Ok(false);
        };
        let removed: Vec<_> = mechanism
            .notifications()
            .iter()
            .map(Referable::opaque_reference)
            .collect();
        mechanism.delete(store)?;
        identity.take_mechanism(&key.uid);
        debug!(mechanism = %key, "mechanism removed");
        for r in removed {
            self.listeners.emit(&ModelEvent::NotificationRemoved(r));
        }
        Ok(true)
    }

    /// Apply `edit` to a mechanism and save it.
    ///
    /// If the backend rejects the result, or fails, the mechanism is put
    /// back exactly as it was.
    pub fn update_mechanism<F>(&mut self, key: &MechanismKey, edit: F) -> ModelResult<bool>
    where
        F: FnOnce(&mut Mechanism),
    {
        let index = self.identity_index(&key.owner)?;
        let store = self.storage.as_ref();
        let identity = &mut self.identities[index];
        let mechanism = identity
            .mechanism_mut(&key.uid)
            .ok_or_else(|| ModelError::NotFound(key.to_string()))?;

        let before = mechanism.clone();
        edit(mechanism);
        match mechanism.save(store) {
            Ok(true) => {}
            Ok(false) => {
                *mechanism = before;
                return Ok(false);
            }
            Err(e) => {
                *mechanism = before;
                return Err(e.into());
            }
        }

        if mechanism.uid() != key.uid {
            let uid = mechanism.uid().to_string();
            if let Some(moved) = identity.take_mechanism(&uid) {
                identity.push_mechanism(moved);
            }
        }
        Ok(true)
    }

    /// Change a mechanism's UID in memory only.
    ///
    /// Meant for backends that derive UIDs rather than store them, ahead of
    /// [`transfer_storage`](Self::transfer_storage). Returns `false` if the
    /// mechanism is absent or `uid` is already used in this tree.
    pub fn relabel_mechanism(&mut self, key: &MechanismKey, uid: &str) -> bool {
        if self.mechanisms().any(|m| m.uid() == uid) {
            return false;
        }
        let Ok(index) = self.identity_index(&key.owner) else {
            return false;
        };
        let identity = &mut self.identities[index];
        let Some(mut mechanism) = identity.take_mechanism(&key.uid) else {
            return false;
        };
        mechanism.set_uid(uid);
        identity.push_mechanism(mechanism);
        true
    }

    // ---- Notification mutations ----

    /// Build a notification for a push mechanism and store it.
    pub fn add_notification(
        &mut self,
        key: &MechanismKey,
        builder: PushNotificationBuilder,
    ) -> ModelResult<Option<OpaqueReference>> {
        let index = self.identity_index(&key.owner)?;
        let store = self.storage.as_ref();
        let mechanism = self.identities[index]
            .mechanism_mut(&key.uid)
            .ok_or_else(|| ModelError::NotFound(key.to_string()))?;

        let mut notification = mechanism.build_notification(builder)?;
        if !notification.save(store)? {
            return Ok(None);
        }
        let reference = notification.opaque_reference();
        mechanism.push_notification(notification);
        self.listeners
            .emit(&ModelEvent::NotificationAdded(reference.clone()));
        Ok(Some(reference))
    }

    /// Delete the notification `reference` names. `Ok(false)` if the
    /// reference does not name a notification in this tree.
    pub fn remove_notification(&mut self, reference: &OpaqueReference) -> ModelResult<bool> {
        let Some((i, m, n)) = self.locate_notification(reference) else {
            return Ok(false);
        };
        let store = self.storage.as_ref();
        let mechanism = &mut self.identities[i].mechanisms_mut()[m];
        mechanism.notifications_mut()[n].delete(store)?;
        let time_added = mechanism.notifications()[n].time_added().timestamp_millis();
        mechanism.take_notification(time_added);
        self.listeners
            .emit(&ModelEvent::NotificationRemoved(reference.clone()));
        Ok(true)
    }

    /// Settle a pending notification.
    ///
    /// Returns `Ok(false)` if it was already settled or the backend rejected
    /// the change; the notification is unchanged in both cases.
    pub fn respond_to_notification(
        &mut self,
        reference: &OpaqueReference,
        approved: bool,
    ) -> ModelResult<bool> {
        let (i, m, n) = self
            .locate_notification(reference)
            .ok_or_else(|| ModelError::NotFound(reference.to_string()))?;
        let store = self.storage.as_ref();
        let notification = &mut self.identities[i].mechanisms_mut()[m].notifications_mut()[n];
        if !notification.is_pending() {
            return Ok(false);
        }

        let before = notification.clone();
        if approved {
            notification.accept();
        } else {
            notification.deny();
        }
        match notification.save(store) {
            Ok(true) => {}
            Ok(false) => {
                *notification = before;
                return Ok(false);
            }
            Err(e) => {
                *notification = before;
                return Err(e.into());
            }
        }
        info!(notification = %reference, approved, "notification settled");
        self.listeners
            .emit(&ModelEvent::NotificationResponded(reference.clone()));
        Ok(true)
    }

    // ---- Listeners ----

    pub fn add_listener(&mut self, listener: impl ModelListener + 'static) -> ListenerId {
        self.listeners.add(Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ---- Storage transfer ----

    /// Rebind to `target` and force-insert the whole tree into it.
    ///
    /// All identities go first, then all mechanisms, then all notifications,
    /// so every insert finds its parent already present. Rejected nodes stay
    /// in the tree unstored.
    pub fn transfer_storage(&mut self, target: Arc<dyn StorageSystem>) -> ModelResult<TransferReport> {
        info!(from = self.storage.name(), to = target.name(), "transferring storage");
        self.storage = target;
        let store = self.storage.as_ref();
        let mut report = TransferReport::default();

        for identity in &mut self.identities {
            report.identities.record(identity.force_save(store)?);
        }
        for identity in &mut self.identities {
            for mechanism in identity.mechanisms_mut() {
                report.mechanisms.record(mechanism.force_save(store)?);
            }
        }
        for identity in &mut self.identities {
            for mechanism in identity.mechanisms_mut() {
                for notification in mechanism.notifications_mut() {
                    report.notifications.record(notification.force_save(store)?);
                }
            }
        }

        info!(
            identities = report.identities.accepted,
            mechanisms = report.mechanisms.accepted,
            notifications = report.notifications.accepted,
            rejected = report.rejected(),
            "storage transfer finished"
        );
        Ok(report)
    }

    // ---- Internals ----

    fn identity_index(&self, key: &IdentityKey) -> ModelResult<usize> {
        self.identities
            .iter()
            .position(|i| i.key() == key)
            .ok_or_else(|| ModelError::NotFound(key.to_string()))
    }

    /// Walk the tree letting each candidate consume the reference's head.
    fn locate(&self, reference: &OpaqueReference) -> Option<Location> {
        let mut remaining = reference.clone();
        let identity = self
            .identities
            .iter()
            .position(|i| i.consume_opaque_reference(&mut remaining))?;
        if remaining.is_empty() {
            return Some(Location {
                identity,
                mechanism: None,
                notification: None,
            });
        }

        let mechanisms = self.identities[identity].mechanisms();
        let mechanism = mechanisms
            .iter()
            .position(|m| m.consume_opaque_reference(&mut remaining))?;
        if remaining.is_empty() {
            return Some(Location {
                identity,
                mechanism: Some(mechanism),
                notification: None,
            });
        }

        let notification = mechanisms[mechanism]
            .notifications()
            .iter()
            .position(|n| n.consume_opaque_reference(&mut remaining))?;
        remaining.is_empty().then_some(Location {
            identity,
            mechanism: Some(mechanism),
            notification: Some(notification),
        })
    }

    fn locate_notification(&self, reference: &OpaqueReference) -> Option<(usize, usize, usize)> {
        match self.locate(reference)? {
            Location {
                identity,
                mechanism: Some(m),
                notification: Some(n),
            } => Some((identity, m, n)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for IdentityModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityModel")
            .field("storage", &self.storage.name())
            .field("identities", &self.identities.len())
            .field("listeners", &self.listeners)
            .finish()
    }
}

fn save_children(identity: &mut Identity, store: &dyn StorageSystem) -> ModelResult<bool> {
    for mechanism in identity.mechanisms_mut() {
        if !mechanism.save(store)? {
            return Ok(false);
        }
        for notification in mechanism.notifications_mut() {
            if !notification.save(store)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn notification_references(identities: &[Identity]) -> Vec<OpaqueReference> {
    identities
        .iter()
        .flat_map(|i| i.mechanisms())
        .flat_map(|m| m.notifications())
        .map(Referable::opaque_reference)
        .collect()
}

/// The shallowest node in `identity` that is not stored.
fn first_unstored(identity: &Identity) -> OpaqueReference {
    if !identity.is_stored() {
        return identity.opaque_reference();
    }
    for mechanism in identity.mechanisms() {
        if !mechanism.is_stored() {
            return mechanism.opaque_reference();
        }
        if let Some(n) = mechanism.notifications().iter().find(|n| !n.is_stored()) {
            return n.opaque_reference();
        }
    }
    identity.opaque_reference()
}
