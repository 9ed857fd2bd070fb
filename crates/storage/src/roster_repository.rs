//! Roster and group storage.
//!
//! Both are bulk-replaced: the uploader sends the complete new state and the
//! repository swaps it in with a delete-then-insert inside the caller's
//! transaction.

use ohq_domain::Tid;
use sqlx::PgConnection;

use crate::StorageError;

/// Roster and groups repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct RosterRepository;

impl RosterRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn roster(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar::<_, String>(
            "SELECT email FROM roster WHERE queue = $1 ORDER BY email",
        )
        .bind(queue)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn in_roster(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        email: &str,
    ) -> Result<bool, StorageError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM roster WHERE queue = $1 AND email = $2)",
        )
        .bind(queue)
        .bind(email)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn set_roster(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        emails: &[String],
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM roster WHERE queue = $1")
            .bind(queue)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        for email in emails {
            sqlx::query("INSERT INTO roster (queue, email) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(queue)
                .bind(email)
                .execute(&mut *conn)
                .await
                .map_err(StorageError::from_sqlx)?;
        }
        Ok(())
    }

    /// Group memberships as a list of email lists.
    pub async fn groups(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<Vec<Vec<String>>, StorageError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT group_id, email FROM groups WHERE queue = $1 ORDER BY group_id, email",
        )
        .bind(queue)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)?;

        let mut out: Vec<Vec<String>> = Vec::new();
        let mut current_group: Option<String> = None;
        for (group_id, email) in rows {
            if current_group.as_deref() != Some(group_id.as_str()) {
                out.push(Vec::new());
                current_group = Some(group_id);
            }
            if let Some(group) = out.last_mut() {
                group.push(email);
            }
        }
        Ok(out)
    }

    /// Replace the queue's group partition. The `(queue, email)` primary key
    /// rejects an email appearing in two groups with `Conflict`.
    pub async fn set_groups(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        groups: &[Vec<String>],
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM groups WHERE queue = $1")
            .bind(queue)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        for group in groups {
            let group_id = Tid::new();
            for email in group {
                sqlx::query("INSERT INTO groups (queue, group_id, email) VALUES ($1, $2, $3)")
                    .bind(queue)
                    .bind(group_id)
                    .bind(email)
                    .execute(&mut *conn)
                    .await
                    .map_err(StorageError::from_sqlx)?;
            }
        }
        Ok(())
    }

    /// Whether any teammate of `email` currently has an active entry.
    pub async fn teammate_has_active_entry(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        email: &str,
    ) -> Result<bool, StorageError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM teammates t \
             JOIN queue_entries e ON e.queue = t.queue AND e.email = t.teammate \
             WHERE t.queue = $1 AND t.email = $2 AND e.active IS NOT NULL)",
        )
        .bind(queue)
        .bind(email)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }
}
