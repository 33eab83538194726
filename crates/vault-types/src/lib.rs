//! Data model for the credential vault.
//!
//! The vault is a tree: [`Identity`] owns [`Mechanism`]s, each mechanism owns
//! [`Notification`]s. Children point back at their parent by natural key
//! ([`IdentityKey`], [`MechanismKey`]) rather than by reference; ownership
//! runs strictly top-down.
//!
//! Every node carries two comparisons:
//!
//! - `==` is strict equality of the node's own fields, including its UID or
//!   time-added key. Storage ids and children are never compared.
//! - `matches` is a looser equivalence used to recognise the same entity
//!   across storage generations during migration.
//!
//! # Key Types
//!
//! - [`Identity`]: account keyed by `(issuer, account name)`
//! - [`Mechanism`]: credential keyed by a globally unique UID
//! - [`Notification`]: approval request keyed by `(mechanism UID, time added)`
//! - [`OpaqueReference`]: backend-independent path to any node

pub mod error;
pub mod identity;
pub mod keys;
pub mod mechanism;
pub mod notification;
pub mod options;
pub mod reference;

pub use error::TypeError;
pub use identity::Identity;
pub use keys::{IdentityKey, MechanismKey, StorageId};
pub use mechanism::{
    Mechanism, MechanismKind, MechanismType, OathMechanism, OathTokenType, PushMechanism,
    OPTIONS_VERSION,
};
pub use notification::{
    Notification, NotificationKind, PushNotification, PushNotificationBuilder, DEFAULT_TTL_SECONDS,
};
pub use options::OptionMap;
pub use reference::{OpaqueReference, Referable};
