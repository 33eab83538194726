use vault_types::{Identity, Mechanism, Notification, StorageId};

use crate::error::StoreResult;

/// A physical home for the identity tree.
///
/// All implementations must satisfy these invariants:
/// - A uniqueness or referential violation is never an `Err`. `add_*`
///   returns `Ok(None)`; `update_*` and `delete_*` return `Ok(false)`.
/// - `Err` is reserved for real failure: I/O, a broken database, a backend
///   that does not support the operation at all.
/// - Storage ids handed out are only meaningful to the backend that issued
///   them.
/// - Records that cannot be decoded are skipped by [`get_model`] (and
///   logged), never fatal to loading the rest of the tree.
///
/// [`get_model`]: StorageSystem::get_model
pub trait StorageSystem: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Load the full tree, every node carrying its storage id.
    fn get_model(&self) -> StoreResult<Vec<Identity>>;

    /// Insert an identity. Returns `Ok(None)` if the natural key is taken.
    fn add_identity(&self, identity: &Identity) -> StoreResult<Option<StorageId>>;

    /// Insert a mechanism. Returns `Ok(None)` if its UID or
    /// `(owner, type)` slot is taken, or its owner is not stored.
    fn add_mechanism(&self, mechanism: &Mechanism) -> StoreResult<Option<StorageId>>;

    /// Insert a notification. Returns `Ok(None)` if its natural key is
    /// taken or its parent mechanism is not stored.
    fn add_notification(&self, notification: &Notification) -> StoreResult<Option<StorageId>>;

    /// Overwrite the mechanism stored under `id`. `Ok(false)` if no such
    /// row exists or the new values violate a constraint.
    fn update_mechanism(&self, id: StorageId, mechanism: &Mechanism) -> StoreResult<bool>;

    /// Overwrite the notification stored under `id`. `Ok(false)` if no such
    /// row exists or the new values violate a constraint.
    fn update_notification(&self, id: StorageId, notification: &Notification) -> StoreResult<bool>;

    /// Delete an identity row. Returns `true` if a row was removed.
    fn delete_identity(&self, id: StorageId) -> StoreResult<bool>;

    /// Delete a mechanism row. Returns `true` if a row was removed.
    fn delete_mechanism(&self, id: StorageId) -> StoreResult<bool>;

    /// Delete a notification row. Returns `true` if a row was removed.
    fn delete_notification(&self, id: StorageId) -> StoreResult<bool>;

    /// Whether the backend holds no data at all.
    fn is_empty(&self) -> StoreResult<bool>;
}
