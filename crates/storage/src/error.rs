//! Storage errors.

use ohq_domain::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A targeted row does not exist.
    #[error("row not found")]
    NotFound,

    /// A unique constraint rejected the write.
    #[error("conflicting row")]
    Conflict,

    #[error("Database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),
}

impl StorageError {
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            _ => StorageError::Query(err),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound("not found".to_string()),
            StorageError::Conflict => ApiError::Conflict("conflicting resource".to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}
