//! Relational schema.
//!
//! Uniqueness and referential rules live in the tables themselves:
//!
//! - `identity` is keyed by `(issuer, account_name)`.
//! - `mechanism` is keyed by `(id_issuer, id_account_name, type)`, carries a
//!   separate `UNIQUE` UID, and references its owner identity.
//! - `notification` is keyed by `(mechanism_uid, time_received)` and
//!   references its mechanism by UID.
//!
//! All tables keep SQLite's implicit `rowid`, which serves as the storage id.

use rusqlite::Connection;

use crate::error::StoreResult;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identity (
    issuer          TEXT NOT NULL,
    account_name    TEXT NOT NULL,
    image_url       TEXT,
    bg_color        TEXT,
    PRIMARY KEY (issuer, account_name)
);

CREATE TABLE IF NOT EXISTS mechanism (
    id_issuer       TEXT NOT NULL,
    id_account_name TEXT NOT NULL,
    mechanism_uid   TEXT NOT NULL UNIQUE,
    type            TEXT NOT NULL,
    version         INTEGER NOT NULL,
    options         TEXT NOT NULL,
    PRIMARY KEY (id_issuer, id_account_name, type),
    FOREIGN KEY (id_issuer, id_account_name) REFERENCES identity (issuer, account_name)
);

CREATE TABLE IF NOT EXISTS notification (
    mechanism_uid   TEXT NOT NULL,
    time_received   INTEGER NOT NULL,
    time_expired    INTEGER NOT NULL,
    data            TEXT NOT NULL,
    pending         INTEGER NOT NULL,
    approved        INTEGER NOT NULL,
    PRIMARY KEY (mechanism_uid, time_received),
    FOREIGN KEY (mechanism_uid) REFERENCES mechanism (mechanism_uid)
);
";

/// Enable constraint enforcement and create any missing tables.
pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
