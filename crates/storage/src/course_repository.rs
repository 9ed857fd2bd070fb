//! Course, course-admin and site-admin storage.

use ohq_domain::{Course, Tid};
use sqlx::PgConnection;

use crate::StorageError;

/// Course repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct CourseRepository;

impl CourseRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn list(&self, conn: &mut PgConnection) -> Result<Vec<Course>, StorageError> {
        sqlx::query_as::<_, Course>("SELECT id, name FROM courses ORDER BY id")
            .fetch_all(conn)
            .await
            .map_err(StorageError::from_sqlx)
    }

    pub async fn get(&self, conn: &mut PgConnection, id: Tid) -> Result<Course, StorageError> {
        sqlx::query_as::<_, Course>("SELECT id, name FROM courses WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(StorageError::from_sqlx)?
            .ok_or(StorageError::NotFound)
    }

    pub async fn create(
        &self,
        conn: &mut PgConnection,
        name: &str,
    ) -> Result<Course, StorageError> {
        sqlx::query_as::<_, Course>(
            "INSERT INTO courses (id, name) VALUES ($1, $2) RETURNING id, name",
        )
        .bind(Tid::new())
        .bind(name)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn update(
        &self,
        conn: &mut PgConnection,
        id: Tid,
        name: &str,
    ) -> Result<Course, StorageError> {
        sqlx::query_as::<_, Course>(
            "UPDATE courses SET name = $2 WHERE id = $1 RETURNING id, name",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(conn)
        .await
        .map_err(StorageError::from_sqlx)?
        .ok_or(StorageError::NotFound)
    }

    /// Hard delete; queues and their entries cascade.
    pub async fn delete(&self, conn: &mut PgConnection, id: Tid) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    pub async fn admins(
        &self,
        conn: &mut PgConnection,
        course: Tid,
    ) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar::<_, String>(
            "SELECT email FROM course_admins WHERE course = $1 ORDER BY email",
        )
        .bind(course)
        .fetch_all(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn add_admins(
        &self,
        conn: &mut PgConnection,
        course: Tid,
        emails: &[String],
    ) -> Result<(), StorageError> {
        for email in emails {
            sqlx::query(
                "INSERT INTO course_admins (course, email) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(course)
            .bind(email)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        }
        Ok(())
    }

    pub async fn remove_admins(
        &self,
        conn: &mut PgConnection,
        course: Tid,
        emails: &[String],
    ) -> Result<(), StorageError> {
        for email in emails {
            sqlx::query("DELETE FROM course_admins WHERE course = $1 AND email = $2")
                .bind(course)
                .bind(email)
                .execute(&mut *conn)
                .await
                .map_err(StorageError::from_sqlx)?;
        }
        Ok(())
    }

    /// Replace the course's admin set.
    pub async fn set_admins(
        &self,
        conn: &mut PgConnection,
        course: Tid,
        emails: &[String],
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM course_admins WHERE course = $1")
            .bind(course)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::from_sqlx)?;
        self.add_admins(conn, course, emails).await
    }

    pub async fn is_course_admin(
        &self,
        conn: &mut PgConnection,
        course: Tid,
        email: &str,
    ) -> Result<bool, StorageError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM course_admins WHERE course = $1 AND email = $2)",
        )
        .bind(course)
        .bind(email)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }

    pub async fn is_site_admin(
        &self,
        conn: &mut PgConnection,
        email: &str,
    ) -> Result<bool, StorageError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM site_admins WHERE email = $1)",
        )
        .bind(email)
        .fetch_one(conn)
        .await
        .map_err(StorageError::from_sqlx)
    }
}
