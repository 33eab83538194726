use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// A loaded node claims to be reachable but its backend does not hold it.
    #[error("model corrupt: {0} is not resident in storage")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid entity: {0}")]
    Type(#[from] vault_types::TypeError),

    #[error("store error: {0}")]
    Store(#[from] vault_store::StoreError),
}

pub type ModelResult<T> = Result<T, ModelError>;
