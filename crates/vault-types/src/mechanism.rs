//! Credential mechanisms and their type-specific payloads.
//!
//! Mechanism variants form a closed set, tagged by [`MechanismType`]. The
//! tag is the same string the relational backend keeps in its `type`
//! column, and each payload round-trips through an [`OptionMap`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::keys::{IdentityKey, MechanismKey, StorageId};
use crate::notification::{Notification, PushNotificationBuilder};
use crate::options::{self, OptionMap};
use crate::reference::{OpaqueReference, Referable};

/// Version of the option-map layout written by this crate.
pub const OPTIONS_VERSION: u32 = 1;

/// Discriminant of a [`MechanismKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MechanismType {
    /// Counter- or time-based one-time codes.
    Oath,
    /// Remote approval requests.
    Push,
}

impl MechanismType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oath => "otpauth",
            Self::Push => "pushauth",
        }
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MechanismType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "otpauth" => Ok(Self::Oath),
            "pushauth" => Ok(Self::Push),
            other => Err(TypeError::UnknownMechanismType(other.to_string())),
        }
    }
}

/// Counter-based or time-based one-time codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OathTokenType {
    Hotp,
    Totp,
}

impl OathTokenType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hotp => "HOTP",
            Self::Totp => "TOTP",
        }
    }
}

impl fmt::Display for OathTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OathTokenType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOTP" => Ok(Self::Hotp),
            "TOTP" => Ok(Self::Totp),
            other => Err(TypeError::InvalidField {
                field: "oathType",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One-time-code parameters. Code generation itself lives elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OathMechanism {
    pub token_type: OathTokenType,
    /// HMAC algorithm name, e.g. `sha1`.
    pub algorithm: String,
    pub secret: Vec<u8>,
    pub digits: u32,
    pub counter: u64,
    /// TOTP step in seconds.
    pub period: u32,
}

impl OathMechanism {
    pub fn new(token_type: OathTokenType, secret: Vec<u8>) -> Self {
        Self {
            token_type,
            algorithm: "sha1".into(),
            secret,
            digits: 6,
            counter: 0,
            period: 30,
        }
    }

    /// Step an HOTP counter forward, returning the counter to use for the
    /// code being generated. TOTP tokens are left untouched.
    pub fn advance_counter(&mut self) -> u64 {
        let current = self.counter;
        if self.token_type == OathTokenType::Hotp {
            self.counter += 1;
        }
        current
    }

    fn to_options(&self) -> OptionMap {
        let mut map = OptionMap::new();
        map.insert("oathType".into(), self.token_type.as_str().into());
        map.insert("algorithm".into(), self.algorithm.clone());
        map.insert("secret".into(), hex::encode(&self.secret));
        map.insert("digits".into(), self.digits.to_string());
        map.insert("counter".into(), self.counter.to_string());
        map.insert("period".into(), self.period.to_string());
        map
    }

    fn from_options(map: &OptionMap) -> Result<Self, TypeError> {
        let secret = hex::decode(options::required(map, "secret")?)
            .map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Ok(Self {
            token_type: options::parsed(map, "oathType")?,
            algorithm: options::required(map, "algorithm")?.to_string(),
            secret,
            digits: options::parsed(map, "digits")?,
            counter: options::parsed(map, "counter")?,
            period: options::parsed(map, "period")?,
        })
    }
}

/// Remote-approval registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMechanism {
    pub registration_endpoint: String,
    pub authentication_endpoint: String,
    /// Shared secret used to sign responses, as issued.
    pub secret: String,
}

impl PushMechanism {
    fn to_options(&self) -> OptionMap {
        let mut map = OptionMap::new();
        map.insert("regEndpoint".into(), self.registration_endpoint.clone());
        map.insert("authEndpoint".into(), self.authentication_endpoint.clone());
        map.insert("secret".into(), self.secret.clone());
        map
    }

    fn from_options(map: &OptionMap) -> Result<Self, TypeError> {
        Ok(Self {
            registration_endpoint: options::required(map, "regEndpoint")?.to_string(),
            authentication_endpoint: options::required(map, "authEndpoint")?.to_string(),
            secret: options::required(map, "secret")?.to_string(),
        })
    }
}

/// Type-specific payload of a mechanism.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MechanismKind {
    Oath(OathMechanism),
    Push(PushMechanism),
}

impl MechanismKind {
    pub fn mechanism_type(&self) -> MechanismType {
        match self {
            Self::Oath(_) => MechanismType::Oath,
            Self::Push(_) => MechanismType::Push,
        }
    }

    pub fn to_options(&self) -> OptionMap {
        match self {
            Self::Oath(oath) => oath.to_options(),
            Self::Push(push) => push.to_options(),
        }
    }

    pub fn from_options(mechanism_type: MechanismType, map: &OptionMap) -> Result<Self, TypeError> {
        match mechanism_type {
            MechanismType::Oath => OathMechanism::from_options(map).map(Self::Oath),
            MechanismType::Push => PushMechanism::from_options(map).map(Self::Push),
        }
    }
}

// ---------------------------------------------------------------------------
// Mechanism
// ---------------------------------------------------------------------------

/// One credential belonging to an identity.
///
/// The owner is held by key, not by reference: the identity owns the
/// mechanism, never the other way round. Equality compares owner, UID and
/// payload; the storage id and child notifications are not compared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mechanism {
    owner: IdentityKey,
    uid: String,
    kind: MechanismKind,
    storage_id: Option<StorageId>,
    notifications: Vec<Notification>,
}

impl Mechanism {
    pub fn new(owner: IdentityKey, uid: impl Into<String>, kind: MechanismKind) -> Self {
        Self {
            owner,
            uid: uid.into(),
            kind,
            storage_id: None,
            notifications: Vec::new(),
        }
    }

    pub fn with_storage_id(mut self, id: StorageId) -> Self {
        self.storage_id = Some(id);
        self
    }

    pub fn owner(&self) -> &IdentityKey {
        &self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: IdentityKey) {
        self.owner = owner;
        self.repoint_children();
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Change the UID; child notifications follow.
    pub fn set_uid(&mut self, uid: impl Into<String>) {
        self.uid = uid.into();
        self.repoint_children();
    }

    pub fn key(&self) -> MechanismKey {
        MechanismKey::new(self.owner.clone(), self.uid.clone())
    }

    pub fn kind(&self) -> &MechanismKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut MechanismKind {
        &mut self.kind
    }

    pub fn mechanism_type(&self) -> MechanismType {
        self.kind.mechanism_type()
    }

    pub fn options(&self) -> OptionMap {
        self.kind.to_options()
    }

    pub fn storage_id(&self) -> Option<StorageId> {
        self.storage_id
    }

    pub fn set_storage_id(&mut self, id: Option<StorageId>) {
        self.storage_id = id;
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut [Notification] {
        &mut self.notifications
    }

    pub fn notification(&self, time_added_ms: i64) -> Option<&Notification> {
        self.notifications
            .iter()
            .find(|n| n.time_added().timestamp_millis() == time_added_ms)
    }

    pub fn notification_mut(&mut self, time_added_ms: i64) -> Option<&mut Notification> {
        self.notifications
            .iter_mut()
            .find(|n| n.time_added().timestamp_millis() == time_added_ms)
    }

    /// Attach a notification, re-pointing its parent key here.
    pub fn push_notification(&mut self, mut notification: Notification) {
        notification.set_parent(self.key());
        self.notifications.push(notification);
        self.notifications.sort_by(Notification::cmp_natural);
    }

    pub fn take_notification(&mut self, time_added_ms: i64) -> Option<Notification> {
        let index = self
            .notifications
            .iter()
            .position(|n| n.time_added().timestamp_millis() == time_added_ms)?;
        Some(self.notifications.remove(index))
    }

    /// Build a notification addressed to this mechanism.
    ///
    /// Only push mechanisms accept notifications.
    pub fn build_notification(&self, builder: PushNotificationBuilder) -> Result<Notification, TypeError> {
        if self.mechanism_type() != MechanismType::Push {
            return Err(TypeError::WrongMechanismType {
                expected: MechanismType::Push,
                actual: self.mechanism_type(),
            });
        }
        builder.build(self.key())
    }

    /// Generation-spanning equivalence: same owner and same declared type.
    ///
    /// UID and payload are ignored. This is sound only while the older
    /// storage format holds at most one mechanism per identity, so that
    /// "same type on the same identity" identifies the credential.
    pub fn matches(&self, other: &Mechanism) -> bool {
        self.owner == other.owner && self.mechanism_type() == other.mechanism_type()
    }

    /// Deterministic iteration order: shorter UIDs first, so integer UIDs
    /// sort numerically.
    pub fn cmp_natural(&self, other: &Mechanism) -> Ordering {
        (self.uid.len(), &self.uid).cmp(&(other.uid.len(), &other.uid))
    }

    fn repoint_children(&mut self) {
        let key = self.key();
        for notification in &mut self.notifications {
            notification.set_parent(key.clone());
        }
    }
}

impl PartialEq for Mechanism {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.uid == other.uid && self.kind == other.kind
    }
}

impl Eq for Mechanism {}

impl Referable for Mechanism {
    fn reference_segment(&self) -> String {
        self.uid.clone()
    }

    fn opaque_reference(&self) -> OpaqueReference {
        OpaqueReference::new([self.owner.reference_segment(), self.reference_segment()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn alice() -> IdentityKey {
        IdentityKey::new("ForgeRock", "alice")
    }

    fn hotp(uid: &str, counter: u64) -> Mechanism {
        let mut oath = OathMechanism::new(OathTokenType::Hotp, b"12345678901234567890".to_vec());
        oath.counter = counter;
        Mechanism::new(alice(), uid, MechanismKind::Oath(oath))
    }

    fn push(uid: &str) -> Mechanism {
        Mechanism::new(
            alice(),
            uid,
            MechanismKind::Push(PushMechanism {
                registration_endpoint: "https://idp.example/register".into(),
                authentication_endpoint: "https://idp.example/authenticate".into(),
                secret: "c2VjcmV0".into(),
            }),
        )
    }

    // -----------------------------------------------------------------------
    // Discriminants
    // -----------------------------------------------------------------------

    #[test]
    fn type_strings_roundtrip() {
        for ty in [MechanismType::Oath, MechanismType::Push] {
            assert_eq!(ty.as_str().parse::<MechanismType>().unwrap(), ty);
        }
        assert!(matches!(
            "smsauth".parse::<MechanismType>(),
            Err(TypeError::UnknownMechanismType(_))
        ));
    }

    #[test]
    fn oath_token_type_is_case_sensitive() {
        assert_eq!("HOTP".parse::<OathTokenType>().unwrap(), OathTokenType::Hotp);
        assert!("hotp".parse::<OathTokenType>().is_err());
    }

    // -----------------------------------------------------------------------
    // Option maps
    // -----------------------------------------------------------------------

    #[test]
    fn push_options_roundtrip() {
        let mechanism = push("0");
        let decoded = MechanismKind::from_options(MechanismType::Push, &mechanism.options()).unwrap();
        assert_eq!(&decoded, mechanism.kind());
    }

    #[test]
    fn oath_options_reject_bad_secret() {
        let mut map = hotp("0", 0).options();
        map.insert("secret".into(), "zz".into());
        assert!(matches!(
            MechanismKind::from_options(MechanismType::Oath, &map),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn oath_options_under_push_type_fail() {
        let map = hotp("0", 0).options();
        assert_eq!(
            MechanismKind::from_options(MechanismType::Push, &map),
            Err(TypeError::MissingField("regEndpoint"))
        );
    }

    proptest! {
        #[test]
        fn oath_options_roundtrip(
            secret in proptest::collection::vec(any::<u8>(), 0..40),
            digits in 4u32..10,
            counter in any::<u64>(),
            period in 1u32..300,
            totp in any::<bool>(),
        ) {
            let token_type = if totp { OathTokenType::Totp } else { OathTokenType::Hotp };
            let kind = MechanismKind::Oath(OathMechanism {
                token_type,
                algorithm: "sha256".into(),
                secret,
                digits,
                counter,
                period,
            });
            let decoded = MechanismKind::from_options(MechanismType::Oath, &kind.to_options()).unwrap();
            prop_assert_eq!(decoded, kind);
        }
    }

    // -----------------------------------------------------------------------
    // Equivalences
    // -----------------------------------------------------------------------

    #[test]
    fn equality_includes_uid_and_payload() {
        assert_eq!(hotp("0", 5), hotp("0", 5).with_storage_id(StorageId::new(3)));
        assert_ne!(hotp("0", 5), hotp("1", 5));
        assert_ne!(hotp("0", 5), hotp("0", 6));
    }

    #[test]
    fn matches_ignores_uid_and_payload() {
        assert!(hotp("0", 5).matches(&hotp("7", 1)));
        assert!(!hotp("0", 5).matches(&push("0")));
    }

    #[test]
    fn matches_requires_same_owner() {
        let other = Mechanism::new(
            IdentityKey::new("OtherIDP", "alice"),
            "0",
            hotp("0", 5).kind().clone(),
        );
        assert!(!hotp("0", 5).matches(&other));
    }

    // -----------------------------------------------------------------------
    // Counters and notifications
    // -----------------------------------------------------------------------

    #[test]
    fn hotp_counter_advances_totp_does_not() {
        let mut oath = OathMechanism::new(OathTokenType::Hotp, vec![1]);
        assert_eq!(oath.advance_counter(), 0);
        assert_eq!(oath.counter, 1);

        let mut oath = OathMechanism::new(OathTokenType::Totp, vec![1]);
        oath.advance_counter();
        assert_eq!(oath.counter, 0);
    }

    #[test]
    fn oath_mechanism_refuses_notifications() {
        let builder = PushNotificationBuilder::new()
            .message_id("m")
            .challenge("c")
            .time_added(Utc.timestamp_millis_opt(1_000).unwrap());
        assert_eq!(
            hotp("0", 0).build_notification(builder).unwrap_err(),
            TypeError::WrongMechanismType {
                expected: MechanismType::Push,
                actual: MechanismType::Oath,
            }
        );
    }

    #[test]
    fn set_uid_repoints_notifications() {
        let mut mechanism = push("0");
        let notification = mechanism
            .build_notification(
                PushNotificationBuilder::new()
                    .message_id("m")
                    .challenge("c")
                    .time_added(Utc.timestamp_millis_opt(5_000).unwrap()),
            )
            .unwrap();
        mechanism.push_notification(notification);
        mechanism.set_uid("9");
        assert_eq!(mechanism.notifications()[0].parent().uid, "9");
    }

    #[test]
    fn reference_walks_up_to_owner() {
        assert_eq!(push("4").opaque_reference().to_string(), "ForgeRock:alice/4");
    }

    #[test]
    fn natural_order_is_numeric_for_integer_uids() {
        let mut list = vec![push("10"), push("9"), push("1")];
        list.sort_by(Mechanism::cmp_natural);
        let uids: Vec<_> = list.iter().map(Mechanism::uid).collect();
        assert_eq!(uids, vec!["1", "9", "10"]);
    }
}
