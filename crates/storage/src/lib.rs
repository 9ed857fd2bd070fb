//! Storage layer for the queue server.
//!
//! Repositories are stateless: every method executes against a
//! caller-supplied `&mut PgConnection`, which in practice is the request's
//! transaction. Handlers never reach for the pool themselves, so a mutation
//! either commits as a whole or not at all.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod course_repository;
pub mod entry_repository;
pub mod error;
pub mod queue_repository;
pub mod roster_repository;

pub use course_repository::CourseRepository;
pub use entry_repository::{EntryRepository, NewEntry};
pub use error::StorageError;
pub use queue_repository::QueueRepository;
pub use roster_repository::RosterRepository;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(StorageError::Connection)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(StorageError::Migration)
}

/// Check database connectivity.
pub async fn check_connection(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(StorageError::Query)?;
    Ok(())
}
