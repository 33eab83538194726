//! Storage backends for the credential vault.
//!
//! The identity tree can live in two physical formats, both behind the
//! [`StorageSystem`] trait:
//!
//! - [`LegacyStorage`] -- first-generation key/value document. Read and
//!   drain only.
//! - [`SqliteStorage`] -- relational store with uniqueness and referential
//!   rules enforced by the schema.
//!
//! Tree nodes reach a backend only through the [`Entity`] lifecycle
//! contract, which this crate implements for every node type.
//!
//! # Design Rules
//!
//! 1. Constraint violations are return values, never errors.
//! 2. A record that cannot be decoded is skipped and logged, not fatal.
//! 3. Storage ids mean nothing outside the backend that issued them.

pub mod entity;
pub mod error;
pub mod legacy;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use entity::Entity;
pub use error::{StoreError, StoreResult};
pub use legacy::{LegacyDocument, LegacyRecord, LegacyStorage};
pub use sqlite::SqliteStorage;
pub use traits::StorageSystem;
