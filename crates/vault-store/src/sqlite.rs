//! Relational backend on SQLite.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use tracing::{debug, warn};

use vault_types::options;
use vault_types::{
    Identity, IdentityKey, Mechanism, MechanismKind, MechanismType, Notification,
    NotificationKind, StorageId, TypeError, OPTIONS_VERSION,
};

use crate::error::{StoreError, StoreResult};
use crate::schema::init_schema;
use crate::traits::StorageSystem;

/// Current-generation backend: three constrained tables in one SQLite
/// database.
///
/// The connection sits behind a `Mutex`; the backend itself is meant for a
/// single writer at a time.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private database that lives as long as this value.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Row counts for `(identity, mechanism, notification)`.
    pub fn counts(&self) -> StoreResult<(u64, u64, u64)> {
        let conn = self.conn()?;
        let count = |table: &str| -> StoreResult<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok(n as u64)
        };
        Ok((count("identity")?, count("mechanism")?, count("notification")?))
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Fold constraint violations into `Ok(None)`.
fn constrained<T>(op: &str, result: rusqlite::Result<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_constraint_violation(&e) => {
            debug!(op, error = %e, "constraint violation");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(field: &'static str, ms: i64) -> Result<DateTime<Utc>, TypeError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(TypeError::InvalidField {
        field,
        value: ms.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct MechanismRow {
    rowid: i64,
    issuer: String,
    account_name: String,
    uid: String,
    mechanism_type: String,
    version: i64,
    options: String,
}

impl MechanismRow {
    fn decode(self) -> Result<Mechanism, TypeError> {
        if self.version > i64::from(OPTIONS_VERSION) {
            return Err(TypeError::InvalidField {
                field: "version",
                value: self.version.to_string(),
            });
        }
        let mechanism_type: MechanismType = self.mechanism_type.parse()?;
        let map = options::decode(&self.options)?;
        let kind = MechanismKind::from_options(mechanism_type, &map)?;
        Ok(Mechanism::new(
            IdentityKey::new(self.issuer, self.account_name),
            self.uid,
            kind,
        )
        .with_storage_id(StorageId::new(self.rowid)))
    }
}

struct NotificationRow {
    rowid: i64,
    mechanism_uid: String,
    time_received: i64,
    time_expired: i64,
    data: String,
    pending: bool,
    approved: bool,
}

impl NotificationRow {
    fn decode(self, owner: IdentityKey) -> Result<Notification, TypeError> {
        let kind = NotificationKind::from_data(&options::decode(&self.data)?)?;
        Ok(Notification::new(
            vault_types::MechanismKey::new(owner, self.mechanism_uid),
            from_millis("time_received", self.time_received)?,
            from_millis("time_expired", self.time_expired)?,
            kind,
        )
        .with_state(self.pending, self.approved)
        .with_storage_id(StorageId::new(self.rowid)))
    }
}

fn encode_options(mechanism: &Mechanism) -> StoreResult<String> {
    options::encode(&mechanism.options()).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_data(notification: &Notification) -> StoreResult<String> {
    options::encode(&notification.data()).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// StorageSystem
// ---------------------------------------------------------------------------

impl StorageSystem for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get_model(&self) -> StoreResult<Vec<Identity>> {
        let conn = self.conn()?;

        let mut identities: BTreeMap<IdentityKey, Identity> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT rowid, issuer, account_name, image_url, bg_color FROM identity",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;
            for row in rows {
                let (rowid, issuer, account_name, image_url, bg_color) = row?;
                let mut identity =
                    Identity::new(issuer, account_name).with_storage_id(StorageId::new(rowid));
                if let Some(url) = image_url {
                    identity = identity.with_image_url(url);
                }
                if let Some(color) = bg_color {
                    identity = identity.with_bg_color(color);
                }
                identities.insert(identity.key().clone(), identity);
            }
        }

        let mut owners: HashMap<String, IdentityKey> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT rowid, id_issuer, id_account_name, mechanism_uid, type, version, options \
                 FROM mechanism",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(MechanismRow {
                    rowid: row.get(0)?,
                    issuer: row.get(1)?,
                    account_name: row.get(2)?,
                    uid: row.get(3)?,
                    mechanism_type: row.get(4)?,
                    version: row.get(5)?,
                    options: row.get(6)?,
                })
            })?;
            for row in rows {
                let row = row?;
                let rowid = row.rowid;
                let mechanism = match row.decode() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(rowid, error = %e, "skipping undecodable mechanism row");
                        continue;
                    }
                };
                match identities.get_mut(mechanism.owner()) {
                    Some(identity) => {
                        owners.insert(mechanism.uid().to_string(), identity.key().clone());
                        identity.push_mechanism(mechanism);
                    }
                    None => warn!(rowid, uid = %mechanism.uid(), "skipping mechanism without owner"),
                }
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT rowid, mechanism_uid, time_received, time_expired, data, pending, approved \
                 FROM notification",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(NotificationRow {
                    rowid: row.get(0)?,
                    mechanism_uid: row.get(1)?,
                    time_received: row.get(2)?,
                    time_expired: row.get(3)?,
                    data: row.get(4)?,
                    pending: row.get(5)?,
                    approved: row.get(6)?,
                })
            })?;
            for row in rows {
                let row = row?;
                let rowid = row.rowid;
                let Some(owner) = owners.get(&row.mechanism_uid).cloned() else {
                    warn!(rowid, uid = %row.mechanism_uid, "skipping notification without mechanism");
                    continue;
                };
                let uid = row.mechanism_uid.clone();
                let notification = match row.decode(owner.clone()) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(rowid, error = %e, "skipping undecodable notification row");
                        continue;
                    }
                };
                if let Some(mechanism) = identities
                    .get_mut(&owner)
                    .and_then(|identity| identity.mechanism_mut(&uid))
                {
                    mechanism.push_notification(notification);
                }
            }
        }

        Ok(identities.into_values().collect())
    }

    fn add_identity(&self, identity: &Identity) -> StoreResult<Option<StorageId>> {
        let conn = self.conn()?;
        let inserted = constrained(
            "add_identity",
            conn.execute(
                "INSERT INTO identity (issuer, account_name, image_url, bg_color) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    identity.issuer(),
                    identity.account_name(),
                    identity.image_url(),
                    identity.bg_color()
                ],
            ),
        )?;
        Ok(inserted.map(|_| StorageId::new(conn.last_insert_rowid())))
    }

    fn add_mechanism(&self, mechanism: &Mechanism) -> StoreResult<Option<StorageId>> {
        let options = encode_options(mechanism)?;
        let conn = self.conn()?;
        let inserted = constrained(
            "add_mechanism",
            conn.execute(
                "INSERT INTO mechanism \
                 (id_issuer, id_account_name, mechanism_uid, type, version, options) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    mechanism.owner().issuer,
                    mechanism.owner().account_name,
                    mechanism.uid(),
                    mechanism.mechanism_type().as_str(),
                    OPTIONS_VERSION,
                    options
                ],
            ),
        )?;
        Ok(inserted.map(|_| StorageId::new(conn.last_insert_rowid())))
    }

    fn add_notification(&self, notification: &Notification) -> StoreResult<Option<StorageId>> {
        let data = encode_data(notification)?;
        let conn = self.conn()?;
        let inserted = constrained(
            "add_notification",
            conn.execute(
                "INSERT INTO notification \
                 (mechanism_uid, time_received, time_expired, data, pending, approved) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    notification.parent().uid,
                    millis(notification.time_added()),
                    millis(notification.time_expired()),
                    data,
                    notification.is_pending(),
                    notification.is_approved()
                ],
            ),
        )?;
        Ok(inserted.map(|_| StorageId::new(conn.last_insert_rowid())))
    }

    fn update_mechanism(&self, id: StorageId, mechanism: &Mechanism) -> StoreResult<bool> {
        let options = encode_options(mechanism)?;
        let conn = self.conn()?;
        let changed = constrained(
            "update_mechanism",
            conn.execute(
                "UPDATE mechanism SET id_issuer = ?1, id_account_name = ?2, mechanism_uid = ?3, \
                 type = ?4, version = ?5, options = ?6 WHERE rowid = ?7",
                params![
                    mechanism.owner().issuer,
                    mechanism.owner().account_name,
                    mechanism.uid(),
                    mechanism.mechanism_type().as_str(),
                    OPTIONS_VERSION,
                    options,
                    id.get()
                ],
            ),
        )?;
        Ok(changed.unwrap_or(0) > 0)
    }

    fn update_notification(&self, id: StorageId, notification: &Notification) -> StoreResult<bool> {
        let data = encode_data(notification)?;
        let conn = self.conn()?;
        let changed = constrained(
            "update_notification",
            conn.execute(
                "UPDATE notification SET mechanism_uid = ?1, time_received = ?2, \
                 time_expired = ?3, data = ?4, pending = ?5, approved = ?6 WHERE rowid = ?7",
                params![
                    notification.parent().uid,
                    millis(notification.time_added()),
                    millis(notification.time_expired()),
                    data,
                    notification.is_pending(),
                    notification.is_approved(),
                    id.get()
                ],
            ),
        )?;
        Ok(changed.unwrap_or(0) > 0)
    }

    fn delete_identity(&self, id: StorageId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = constrained(
            "delete_identity",
            conn.execute("DELETE FROM identity WHERE rowid = ?1", params![id.get()]),
        )?;
        Ok(removed.unwrap_or(0) > 0)
    }

    fn delete_mechanism(&self, id: StorageId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = constrained(
            "delete_mechanism",
            conn.execute("DELETE FROM mechanism WHERE rowid = ?1", params![id.get()]),
        )?;
        Ok(removed.unwrap_or(0) > 0)
    }

    fn delete_notification(&self, id: StorageId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = constrained(
            "delete_notification",
            conn.execute("DELETE FROM notification WHERE rowid = ?1", params![id.get()]),
        )?;
        Ok(removed.unwrap_or(0) > 0)
    }

    fn is_empty(&self) -> StoreResult<bool> {
        let (identities, mechanisms, notifications) = self.counts()?;
        Ok(identities == 0 && mechanisms == 0 && notifications == 0)
    }
}
