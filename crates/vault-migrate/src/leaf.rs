//! Non-root tree nodes as flat, comparable values.
//!
//! Migration diffs whole trees as sets of mechanisms and notifications.
//! Identities are never diffed: they are implied by their mechanisms.

use vault_types::{Identity, Mechanism, Notification};

/// A mechanism, or a notification together with its parent mechanism.
///
/// `==` is strict equality at the leaf's own level; a notification leaf
/// also requires strictly equal parents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Leaf {
    Mechanism(Mechanism),
    Notification { parent: Mechanism, notification: Notification },
}

impl Leaf {
    /// Generation-spanning equivalence.
    ///
    /// Mechanisms match on owner and type. Notifications match when their
    /// parents are strictly equal and their time-added values agree.
    pub(crate) fn matches(&self, other: &Leaf) -> bool {
        match (self, other) {
            (Leaf::Mechanism(a), Leaf::Mechanism(b)) => a.matches(b),
            (
                Leaf::Notification { parent: pa, notification: a },
                Leaf::Notification { parent: pb, notification: b },
            ) => a.matches(pa, b, pb),
            _ => false,
        }
    }

    pub(crate) fn as_mechanism(&self) -> Option<&Mechanism> {
        match self {
            Leaf::Mechanism(m) => Some(m),
            Leaf::Notification { .. } => None,
        }
    }
}

/// Flatten a forest into its leaves, mechanisms before their notifications.
pub(crate) fn leaves<'a>(identities: impl IntoIterator<Item = &'a Identity>) -> Vec<Leaf> {
    let mut out = Vec::new();
    for identity in identities {
        for mechanism in identity.mechanisms() {
            out.push(Leaf::Mechanism(mechanism.clone()));
            for notification in mechanism.notifications() {
                out.push(Leaf::Notification {
                    parent: mechanism.clone(),
                    notification: notification.clone(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vault_types::{
        IdentityKey, MechanismKind, OathMechanism, OathTokenType, PushMechanism,
        PushNotificationBuilder,
    };

    fn hotp(uid: &str, counter: u64) -> Mechanism {
        let mut oath = OathMechanism::new(OathTokenType::Hotp, b"secret".to_vec());
        oath.counter = counter;
        Mechanism::new(IdentityKey::new("ForgeRock", "alice"), uid, MechanismKind::Oath(oath))
    }

    fn push(uid: &str) -> Mechanism {
        Mechanism::new(
            IdentityKey::new("ForgeRock", "alice"),
            uid,
            MechanismKind::Push(PushMechanism {
                registration_endpoint: "r".into(),
                authentication_endpoint: "a".into(),
                secret: "s".into(),
            }),
        )
    }

    fn notification_leaf(parent: &Mechanism, ms: i64, message: &str) -> Leaf {
        let notification = parent
            .build_notification(
                PushNotificationBuilder::new()
                    .message_id(message)
                    .challenge("c")
                    .time_added(Utc.timestamp_millis_opt(ms).unwrap()),
            )
            .unwrap();
        Leaf::Notification {
            parent: parent.clone(),
            notification,
        }
    }

    #[test]
    fn mechanism_leaves_match_on_owner_and_type() {
        let a = Leaf::Mechanism(hotp("0", 5));
        assert!(a.matches(&Leaf::Mechanism(hotp("3", 1))));
        assert!(!a.matches(&Leaf::Mechanism(push("0"))));
        assert_ne!(a, Leaf::Mechanism(hotp("3", 1)));
    }

    #[test]
    fn notification_leaves_need_equal_parents() {
        let parent = push("0");
        let a = notification_leaf(&parent, 10, "one");
        assert!(a.matches(&notification_leaf(&parent, 10, "two")));
        assert!(!a.matches(&notification_leaf(&parent, 11, "one")));
        assert!(!a.matches(&notification_leaf(&push("1"), 10, "one")));
        assert!(!a.matches(&Leaf::Mechanism(parent)));
    }

    #[test]
    fn leaves_flatten_in_tree_order() {
        let mut identity = Identity::new("ForgeRock", "alice");
        let mut mechanism = push("0");
        if let Leaf::Notification { notification, .. } = notification_leaf(&mechanism, 1, "m") {
            mechanism.push_notification(notification);
        }
        identity.push_mechanism(mechanism);
        identity.push_mechanism(hotp("1", 0));

        let flat = leaves([&identity]);
        assert_eq!(flat.len(), 3);
        assert!(flat[0].as_mechanism().is_some());
        assert!(flat[1].as_mechanism().is_none());
        assert_eq!(flat[2].as_mechanism().map(Mechanism::uid), Some("1"));
    }
}
