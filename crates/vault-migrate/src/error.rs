use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("unknown storage version: {0}")]
    UnknownVersion(i64),

    #[error("unreadable version marker: {0}")]
    InvalidMarker(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] vault_store::StoreError),

    #[error("model error: {0}")]
    Model(#[from] vault_model::ModelError),
}

pub type MigrateResult<T> = Result<T, MigrateError>;
