use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend-assigned row identifier.
///
/// Storage ids are only meaningful to the backend that issued them. They are
/// never used to address entities across backends; see
/// [`OpaqueReference`](crate::OpaqueReference) for that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageId(i64);

impl StorageId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Natural key of an [`Identity`](crate::Identity): `(issuer, account name)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub issuer: String,
    pub account_name: String,
}

impl IdentityKey {
    pub fn new(issuer: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            account_name: account_name.into(),
        }
    }

    /// The opaque-reference segment naming this identity.
    ///
    /// `issuer:account`, or just `account` when the issuer is empty.
    pub fn reference_segment(&self) -> String {
        if self.issuer.is_empty() {
            self.account_name.clone()
        } else {
            format!("{}:{}", self.issuer, self.account_name)
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference_segment())
    }
}

/// Non-owning handle from a child back to its [`Mechanism`](crate::Mechanism).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MechanismKey {
    pub owner: IdentityKey,
    pub uid: String,
}

impl MechanismKey {
    pub fn new(owner: IdentityKey, uid: impl Into<String>) -> Self {
        Self {
            owner,
            uid: uid.into(),
        }
    }
}

impl fmt::Display for MechanismKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.uid)
    }
}
