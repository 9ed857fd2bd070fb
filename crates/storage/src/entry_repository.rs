//! Queue entry storage: the state machine's persistent side.
//!
//! The `(queue, email) WHERE active IS NOT NULL` unique index is the final
//! arbiter for "one active entry per student"; concurrent writers race on it
//! and the loser surfaces `Conflict`.

use chrono::{DateTime, Utc};
use ohq_domain::{QueueEntry, Tid};
use sqlx::PgConnection;

use crate::StorageError;

const ENTRY_COLUMNS: &str = "id, queue, email, name, description, location, priority, pinned, \
                             helping, helped, active, removed_at, removed_by";

/// A signup about to be inserted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub queue: Tid,
    pub email: String,
    pub name: String,
    pub description: String,
    pub location: String,
    pub priority: i32,
}

/// Entry repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryRepository;

impl EntryRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn get(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE queue = $1 AND id = $2"
        ))
        .bind(queue)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    /// All active entries in insertion order.
    pub async fn active_entries(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries \
             WHERE queue = $1 AND active IS NOT NULL ORDER BY id"
        ))
        .bind(queue)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn active_entry_for(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        email: &str,
    ) -> Result<Option<QueueEntry>, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries \
             WHERE queue = $1 AND email = $2 AND active IS NOT NULL"
        ))
        .bind(queue)
        .bind(email)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Insert a fresh signup. `Conflict` when the student already has an
    /// active entry.
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        entry: NewEntry,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "INSERT INTO queue_entries (id, queue, email, name, description, location, priority, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE) RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(Tid::new())
        .bind(entry.queue)
        .bind(&entry.email)
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(&entry.location)
        .bind(entry.priority)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Owner edits to the free-form fields. Priority, pinned and helping are
    /// untouched.
    pub async fn update(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
        description: &str,
        location: &str,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET description = $3, location = $4 \
             WHERE queue = $1 AND id = $2 AND active IS NOT NULL RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .bind(id)
        .bind(description)
        .bind(location)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    /// Archive an active entry. `NotFound` when it was already archived.
    pub async fn remove(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
        removed_by: &str,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET active = NULL, pinned = FALSE, helping = '', \
             helped = TRUE, removed_at = now(), removed_by = $3 \
             WHERE queue = $1 AND id = $2 AND active IS NOT NULL RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .bind(id)
        .bind(removed_by)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    /// Resurrect (or re-mark) an entry as pinned and active. `Conflict` when
    /// the owner already has a different active entry.
    pub async fn pin(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET active = TRUE, pinned = TRUE, helped = FALSE, \
             removed_at = NULL, removed_by = NULL \
             WHERE queue = $1 AND id = $2 RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    pub async fn set_helping(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
        helping: &str,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET helping = $3 \
             WHERE queue = $1 AND id = $2 AND active IS NOT NULL RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .bind(id)
        .bind(helping)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    pub async fn set_helped(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
        helped: bool,
    ) -> Result<QueueEntry, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET helped = $3 \
             WHERE queue = $1 AND id = $2 RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .bind(id)
        .bind(helped)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    /// Archive every active entry at once. Cleared entries do not count as
    /// helped.
    pub async fn clear(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        removed_by: &str,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET active = NULL, pinned = FALSE, helping = '', \
             helped = FALSE, removed_at = now(), removed_by = $2 \
             WHERE queue = $1 AND active IS NOT NULL RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .bind(removed_by)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Assign every active entry a fresh uniform priority in 1..=10.
    pub async fn randomize(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "UPDATE queue_entries SET priority = 1 + floor(random() * 10)::int \
             WHERE queue = $1 AND active IS NOT NULL RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(queue)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Recently archived entries, newest first.
    pub async fn stack(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        limit: i64,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM queue_entries \
             WHERE queue = $1 AND active IS NULL ORDER BY removed_at DESC, id DESC LIMIT $2"
        ))
        .bind(queue)
        .bind(limit)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// When the student was last helped by staff, for cooldown arithmetic.
    /// Self-removals don't count.
    pub async fn last_helped_time(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        email: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(removed_at) FROM queue_entries \
             WHERE queue = $1 AND email = $2 AND helped AND removed_by <> $2",
        )
        .bind(queue)
        .bind(email)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Whether the student was already helped today. `day_start` is the
    /// smallest id of the local day, bounding an indexed range scan.
    pub async fn helped_today(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        email: &str,
        day_start: Tid,
    ) -> Result<bool, StorageError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM queue_entries \
             WHERE queue = $1 AND email = $2 AND id >= $3 AND helped AND removed_by <> $2)",
        )
        .bind(queue)
        .bind(email)
        .bind(day_start)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Whether any teammate of the student was helped today.
    pub async fn teammate_helped_today(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        email: &str,
        day_start: Tid,
    ) -> Result<bool, StorageError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM teammates t \
             JOIN queue_entries e ON e.queue = t.queue AND e.email = t.teammate \
             WHERE t.queue = $1 AND t.email = $2 \
               AND e.id >= $3 AND e.helped AND e.removed_by <> e.email)",
        )
        .bind(queue)
        .bind(email)
        .bind(day_start)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }
}
