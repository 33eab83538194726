/// Errors from storage backends.
///
/// Uniqueness and referential constraint violations are not errors: the
/// [`StorageSystem`](crate::StorageSystem) methods report them through
/// their return values. What remains here is genuine failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failure reported by the SQLite engine.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure of a whole store document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend does not accept writes.
    #[error("store is read-only")]
    ReadOnly,

    /// A lock guarding backend state was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
