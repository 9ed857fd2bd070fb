//! Queue, configuration, schedule and announcement storage.

use ohq_domain::{Announcement, Queue, QueueConfiguration, QueueType, Tid};
use sqlx::PgConnection;
use sqlx::types::Json;

use crate::StorageError;

const QUEUE_COLUMNS: &str = "id, course, type, name, location, active";

#[derive(sqlx::FromRow)]
struct ConfigurationRow {
    id: Tid,
    #[sqlx(rename = "virtual")]
    is_virtual: bool,
    enable_location_field: bool,
    prevent_unregistered: bool,
    prevent_groups: bool,
    prevent_groups_boost: bool,
    prioritize_new: bool,
    scheduled: bool,
    manual_open: bool,
    cooldown: i32,
    prompts: Json<Vec<String>>,
}

impl From<ConfigurationRow> for QueueConfiguration {
    fn from(row: ConfigurationRow) -> Self {
        QueueConfiguration {
            id: row.id,
            is_virtual: row.is_virtual,
            enable_location_field: row.enable_location_field,
            prevent_unregistered: row.prevent_unregistered,
            prevent_groups: row.prevent_groups,
            prevent_groups_boost: row.prevent_groups_boost,
            prioritize_new: row.prioritize_new,
            scheduled: row.scheduled,
            manual_open: row.manual_open,
            cooldown_seconds: row.cooldown,
            prompts: row.prompts.0,
        }
    }
}

/// Queue repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueRepository;

impl QueueRepository {
    pub fn new() -> Self {
        Self
    }

    /// Fetch an active (non-deleted) queue.
    pub async fn get_queue(&self, conn: &mut PgConnection, id: Tid) -> Result<Queue, StorageError> {
        sqlx::query_as::<_, Queue>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    pub async fn queues_for_course(
        &self,
        conn: &mut PgConnection,
        course: Tid,
    ) -> Result<Vec<Queue>, StorageError> {
        sqlx::query_as::<_, Queue>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE course = $1 AND active ORDER BY id"
        ))
        .bind(course)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    /// Create a queue with default configuration and a fully-closed schedule.
    pub async fn create_queue(
        &self,
        conn: &mut PgConnection,
        course: Tid,
        queue_type: QueueType,
        name: &str,
        location: &str,
    ) -> Result<Queue, StorageError> {
        let queue = sqlx::query_as::<_, Queue>(&format!(
            "INSERT INTO queues (id, course, type, name, location) VALUES ($1, $2, $3, $4, $5) \
             RETURNING {QUEUE_COLUMNS}"
        ))
        .bind(Tid::new())
        .bind(course)
        .bind(queue_type)
        .bind(name)
        .bind(location)
        .fetch_one(&mut *conn)
        .await
        .map_err(StorageError::from_sqlx)?;

        let closed = "c".repeat(48);
        for day in 0..7i16 {
            sqlx::query("INSERT INTO schedules (queue, day, schedule) VALUES ($1, $2, $3)")
                .bind(queue.id)
                .bind(day)
                .bind(&closed)
                .execute(&mut *conn)
                .await
                .map_err(StorageError::from_sqlx)?;
        }

        Ok(queue)
    }

    pub async fn update_queue(
        &self,
        conn: &mut PgConnection,
        id: Tid,
        name: &str,
        location: &str,
    ) -> Result<Queue, StorageError> {
        sqlx::query_as::<_, Queue>(&format!(
            "UPDATE queues SET name = $2, location = $3 WHERE id = $1 AND active \
             RETURNING {QUEUE_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(location)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    /// Soft-delete a queue.
    pub async fn delete_queue(&self, conn: &mut PgConnection, id: Tid) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE queues SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    pub async fn get_configuration(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<QueueConfiguration, StorageError> {
        sqlx::query_as::<_, ConfigurationRow>(
            "SELECT id, virtual, enable_location_field, prevent_unregistered, prevent_groups, \
             prevent_groups_boost, prioritize_new, scheduled, manual_open, cooldown, prompts \
             FROM queues WHERE id = $1 AND active",
        )
        .bind(queue)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .map(QueueConfiguration::from)
        .ok_or(StorageError::NotFound)
    }

    pub async fn update_configuration(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        config: &QueueConfiguration,
    ) -> Result<QueueConfiguration, StorageError> {
        sqlx::query_as::<_, ConfigurationRow>(
            "UPDATE queues SET virtual = $2, enable_location_field = $3, \
             prevent_unregistered = $4, prevent_groups = $5, prevent_groups_boost = $6, \
             prioritize_new = $7, scheduled = $8, cooldown = $9, prompts = $10 \
             WHERE id = $1 AND active \
             RETURNING id, virtual, enable_location_field, prevent_unregistered, prevent_groups, \
             prevent_groups_boost, prioritize_new, scheduled, manual_open, cooldown, prompts",
        )
        .bind(queue)
        .bind(config.is_virtual)
        .bind(config.enable_location_field)
        .bind(config.prevent_unregistered)
        .bind(config.prevent_groups)
        .bind(config.prevent_groups_boost)
        .bind(config.prioritize_new)
        .bind(config.scheduled)
        .bind(config.cooldown_seconds)
        .bind(Json(&config.prompts))
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .map(QueueConfiguration::from)
        .ok_or(StorageError::NotFound)
    }

    pub async fn set_manual_open(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        open: bool,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE queues SET manual_open = $2 WHERE id = $1 AND active")
            .bind(queue)
            .bind(open)
            .execute(conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// The week's schedule strings, Sunday first.
    pub async fn get_schedule(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar::<_, String>(
            "SELECT schedule FROM schedules WHERE queue = $1 ORDER BY day",
        )
        .bind(queue)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn update_schedule(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        days: &[String],
    ) -> Result<(), StorageError> {
        for (day, schedule) in days.iter().enumerate() {
            sqlx::query(
                "INSERT INTO schedules (queue, day, schedule) VALUES ($1, $2, $3) \
                 ON CONFLICT (queue, day) DO UPDATE SET schedule = EXCLUDED.schedule",
            )
            .bind(queue)
            .bind(day as i16)
            .bind(schedule)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        }
        Ok(())
    }

    pub async fn announcements(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
    ) -> Result<Vec<Announcement>, StorageError> {
        sqlx::query_as::<_, Announcement>(
            "SELECT id, queue, content FROM announcements WHERE queue = $1 ORDER BY id",
        )
        .bind(queue)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn add_announcement(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        content: &str,
    ) -> Result<Announcement, StorageError> {
        sqlx::query_as::<_, Announcement>(
            "INSERT INTO announcements (id, queue, content) VALUES ($1, $2, $3) \
             RETURNING id, queue, content",
        )
        .bind(Tid::new())
        .bind(queue)
        .bind(content)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn remove_announcement(
        &self,
        conn: &mut PgConnection,
        queue: Tid,
        id: Tid,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM announcements WHERE queue = $1 AND id = $2")
            .bind(queue)
            .bind(id)
            .execute(conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
