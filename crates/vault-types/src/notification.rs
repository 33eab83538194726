//! Remote-approval notifications.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::keys::{MechanismKey, StorageId};
use crate::mechanism::Mechanism;
use crate::options::{self, OptionMap};
use crate::reference::{OpaqueReference, Referable};

/// Lifetime given to a notification when the builder is not told otherwise.
pub const DEFAULT_TTL_SECONDS: i64 = 120;

/// Truncate a timestamp to whole milliseconds, the precision every backend
/// persists.
pub fn to_millis_precision(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

/// Payload of a push notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub message_id: String,
    pub challenge: String,
    pub amlb_cookie: Option<String>,
}

/// Type-specific payload of a notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Push(PushNotification),
}

impl NotificationKind {
    pub fn to_data(&self) -> OptionMap {
        match self {
            Self::Push(push) => {
                let mut map = OptionMap::new();
                map.insert("messageId".into(), push.message_id.clone());
                map.insert("challenge".into(), push.challenge.clone());
                if let Some(cookie) = &push.amlb_cookie {
                    map.insert("amlbCookie".into(), cookie.clone());
                }
                map
            }
        }
    }

    pub fn from_data(map: &OptionMap) -> Result<Self, TypeError> {
        Ok(Self::Push(PushNotification {
            message_id: options::required(map, "messageId")?.to_string(),
            challenge: options::required(map, "challenge")?.to_string(),
            amlb_cookie: map.get("amlbCookie").cloned(),
        }))
    }
}

/// One pending or settled approval request addressed to a mechanism.
///
/// Natural key: `(parent mechanism UID, time added)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    parent: MechanismKey,
    time_added: DateTime<Utc>,
    time_expired: DateTime<Utc>,
    pending: bool,
    approved: bool,
    storage_id: Option<StorageId>,
    kind: NotificationKind,
}

impl Notification {
    /// A fresh, pending notification.
    pub fn new(
        parent: MechanismKey,
        time_added: DateTime<Utc>,
        time_expired: DateTime<Utc>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            parent,
            time_added: to_millis_precision(time_added),
            time_expired: to_millis_precision(time_expired),
            pending: true,
            approved: false,
            storage_id: None,
            kind,
        }
    }

    pub fn with_state(mut self, pending: bool, approved: bool) -> Self {
        self.pending = pending;
        self.approved = approved;
        self
    }

    pub fn with_storage_id(mut self, id: StorageId) -> Self {
        self.storage_id = Some(id);
        self
    }

    pub fn parent(&self) -> &MechanismKey {
        &self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: MechanismKey) {
        self.parent = parent;
    }

    pub fn time_added(&self) -> DateTime<Utc> {
        self.time_added
    }

    pub fn time_expired(&self) -> DateTime<Utc> {
        self.time_expired
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn kind(&self) -> &NotificationKind {
        &self.kind
    }

    pub fn data(&self) -> OptionMap {
        self.kind.to_data()
    }

    pub fn storage_id(&self) -> Option<StorageId> {
        self.storage_id
    }

    pub fn set_storage_id(&mut self, id: Option<StorageId>) {
        self.storage_id = id;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.time_expired
    }

    /// Still awaiting a response and not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.pending && !self.is_expired(now)
    }

    pub fn accept(&mut self) {
        self.pending = false;
        self.approved = true;
    }

    pub fn deny(&mut self) {
        self.pending = false;
        self.approved = false;
    }

    /// Generation-spanning equivalence: the parents are strictly equal
    /// mechanisms and the time-added values agree.
    ///
    /// Parents are passed in because a notification only holds its parent's
    /// key, not the mechanism payload the comparison needs.
    pub fn matches(&self, parent: &Mechanism, other: &Notification, other_parent: &Mechanism) -> bool {
        parent == other_parent && self.time_added == other.time_added
    }

    /// Deterministic iteration order: oldest first.
    pub fn cmp_natural(&self, other: &Notification) -> Ordering {
        self.time_added.cmp(&other.time_added)
    }
}

impl PartialEq for Notification {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent
            && self.time_added == other.time_added
            && self.time_expired == other.time_expired
            && self.pending == other.pending
            && self.approved == other.approved
            && self.kind == other.kind
    }
}

impl Eq for Notification {}

impl Referable for Notification {
    fn reference_segment(&self) -> String {
        self.time_added.timestamp_millis().to_string()
    }

    fn opaque_reference(&self) -> OpaqueReference {
        OpaqueReference::new([
            self.parent.owner.reference_segment(),
            self.parent.uid.clone(),
            self.reference_segment(),
        ])
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a push notification on behalf of the transport layer.
#[derive(Clone, Debug, Default)]
pub struct PushNotificationBuilder {
    message_id: Option<String>,
    challenge: Option<String>,
    amlb_cookie: Option<String>,
    time_added: Option<DateTime<Utc>>,
    time_expired: Option<DateTime<Utc>>,
    ttl: Option<Duration>,
}

impl PushNotificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    pub fn amlb_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.amlb_cookie = Some(cookie.into());
        self
    }

    pub fn time_added(mut self, time: DateTime<Utc>) -> Self {
        self.time_added = Some(time);
        self
    }

    pub fn time_expired(mut self, time: DateTime<Utc>) -> Self {
        self.time_expired = Some(time);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Build the notification for `parent`.
    ///
    /// Message id, challenge and time added are required. Expiry defaults to
    /// time added plus the TTL.
    pub fn build(self, parent: MechanismKey) -> Result<Notification, TypeError> {
        let message_id = self.message_id.ok_or(TypeError::MissingField("messageId"))?;
        let challenge = self.challenge.ok_or(TypeError::MissingField("challenge"))?;
        let time_added = self.time_added.ok_or(TypeError::MissingField("timeAdded"))?;
        let time_expired = self.time_expired.unwrap_or_else(|| {
            time_added + self.ttl.unwrap_or_else(|| Duration::seconds(DEFAULT_TTL_SECONDS))
        });
        Ok(Notification::new(
            parent,
            time_added,
            time_expired,
            NotificationKind::Push(PushNotification {
                message_id,
                challenge,
                amlb_cookie: self.amlb_cookie,
            }),
        ))
    }
}
