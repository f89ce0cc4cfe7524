/// Error type for `PostgreSQL` storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query execution or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// An insert hit an existing `(kind, id)` key.
    #[error("duplicate key: {kind} `{id}` already exists")]
    DuplicateKey { kind: String, id: String },
}
