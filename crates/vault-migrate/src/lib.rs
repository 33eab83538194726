//! Storage versioning and the legacy-to-relational migration.
//!
//! [`Session::open`] is the usual entry point: it reads [`VaultConfig`],
//! runs the [`MigrationEngine`] against both backends, and only then loads
//! the [`vault_model::IdentityModel`] over the relational store.

pub mod config;
pub mod engine;
pub mod error;
mod leaf;
pub mod session;
pub mod version;

pub use config::VaultConfig;
pub use engine::{MigrationEngine, MigrationOutcome, MigrationStatus};
pub use error::{MigrateError, MigrateResult};
pub use session::Session;
pub use version::{FileVersionMarker, InMemoryVersionMarker, StorageVersion, VersionMarker};
