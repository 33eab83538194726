use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::keys::{IdentityKey, StorageId};
use crate::mechanism::Mechanism;
use crate::reference::{OpaqueReference, Referable};

/// An account the user has registered with some issuer.
///
/// An identity owns its mechanisms. Equality covers the identity's own
/// fields only (natural key, image, color); the storage id and the
/// children are not compared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    key: IdentityKey,
    image_url: Option<String>,
    bg_color: Option<String>,
    storage_id: Option<StorageId>,
    mechanisms: Vec<Mechanism>,
}

impl Identity {
    /// Create an identity that has not been stored yet.
    pub fn new(issuer: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            key: IdentityKey::new(issuer, account_name),
            image_url: None,
            bg_color: None,
            storage_id: None,
            mechanisms: Vec::new(),
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_bg_color(mut self, color: impl Into<String>) -> Self {
        self.bg_color = Some(color.into());
        self
    }

    pub fn with_storage_id(mut self, id: StorageId) -> Self {
        self.storage_id = Some(id);
        self
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn issuer(&self) -> &str {
        &self.key.issuer
    }

    pub fn account_name(&self) -> &str {
        &self.key.account_name
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn bg_color(&self) -> Option<&str> {
        self.bg_color.as_deref()
    }

    pub fn storage_id(&self) -> Option<StorageId> {
        self.storage_id
    }

    pub fn set_storage_id(&mut self, id: Option<StorageId>) {
        self.storage_id = id;
    }

    pub fn mechanisms(&self) -> &[Mechanism] {
        &self.mechanisms
    }

    pub fn mechanisms_mut(&mut self) -> &mut [Mechanism] {
        &mut self.mechanisms
    }

    pub fn mechanism(&self, uid: &str) -> Option<&Mechanism> {
        self.mechanisms.iter().find(|m| m.uid() == uid)
    }

    pub fn mechanism_mut(&mut self, uid: &str) -> Option<&mut Mechanism> {
        self.mechanisms.iter_mut().find(|m| m.uid() == uid)
    }

    /// Attach a mechanism to this identity, re-pointing its owner key here.
    pub fn push_mechanism(&mut self, mut mechanism: Mechanism) {
        mechanism.set_owner(self.key.clone());
        self.mechanisms.push(mechanism);
        self.mechanisms.sort_by(Mechanism::cmp_natural);
    }

    /// Detach a mechanism by UID.
    pub fn take_mechanism(&mut self, uid: &str) -> Option<Mechanism> {
        let index = self.mechanisms.iter().position(|m| m.uid() == uid)?;
        Some(self.mechanisms.remove(index))
    }

    /// Generation-spanning equivalence: same natural key.
    pub fn matches(&self, other: &Identity) -> bool {
        self.key == other.key
    }

    /// Deterministic iteration order: by natural key.
    pub fn cmp_natural(&self, other: &Identity) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.image_url == other.image_url
            && self.bg_color == other.bg_color
    }
}

impl Eq for Identity {}

impl Referable for Identity {
    fn reference_segment(&self) -> String {
        self.key.reference_segment()
    }

    fn opaque_reference(&self) -> OpaqueReference {
        OpaqueReference::new([self.reference_segment()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::{MechanismKind, OathMechanism, OathTokenType};

    fn oath(uid: &str) -> Mechanism {
        Mechanism::new(
            IdentityKey::new("elsewhere", "nobody"),
            uid,
            MechanismKind::Oath(OathMechanism::new(OathTokenType::Totp, b"secret".to_vec())),
        )
    }

    #[test]
    fn equality_ignores_storage_id_and_children() {
        let mut stored = Identity::new("ForgeRock", "alice").with_storage_id(StorageId::new(9));
        stored.push_mechanism(oath("0"));
        let fresh = Identity::new("ForgeRock", "alice");
        assert_eq!(stored, fresh);
    }

    #[test]
    fn equality_compares_image_and_color() {
        let a = Identity::new("ForgeRock", "alice").with_bg_color("#ff0000");
        let b = Identity::new("ForgeRock", "alice");
        assert_ne!(a, b);
        assert!(a.matches(&b));
    }

    #[test]
    fn push_mechanism_rewrites_owner() {
        let mut identity = Identity::new("ForgeRock", "alice");
        identity.push_mechanism(oath("0"));
        assert_eq!(identity.mechanisms()[0].owner(), identity.key());
    }

    #[test]
    fn mechanisms_iterate_in_uid_order() {
        let mut identity = Identity::new("ForgeRock", "alice");
        identity.push_mechanism(oath("2"));
        identity.push_mechanism(oath("1"));
        let uids: Vec<_> = identity.mechanisms().iter().map(Mechanism::uid).collect();
        assert_eq!(uids, vec!["1", "2"]);
    }

    #[test]
    fn take_mechanism_detaches_by_uid() {
        let mut identity = Identity::new("ForgeRock", "alice");
        identity.push_mechanism(oath("0"));
        assert!(identity.take_mechanism("0").is_some());
        assert!(identity.take_mechanism("0").is_none());
        assert!(identity.mechanisms().is_empty());
    }

    #[test]
    fn reference_is_single_segment() {
        let identity = Identity::new("", "bob");
        assert_eq!(identity.opaque_reference().to_string(), "bob");
    }
}
