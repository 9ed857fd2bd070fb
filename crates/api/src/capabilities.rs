//! Capability resolution: who counts as a site admin or course admin.

use ohq_domain::{SessionIdentity, Tid};
use ohq_storage::{CourseRepository, StorageError};
use sqlx::PgConnection;

/// Site admins are members of a configured OIDC group or rows in the
/// `site_admins` table.
pub async fn is_site_admin(
    courses: &CourseRepository,
    conn: &mut PgConnection,
    identity: &SessionIdentity,
    admin_groups: &[String],
) -> Result<bool, StorageError> {
    if identity.in_any_group(admin_groups) {
        return Ok(true);
    }
    courses.is_site_admin(conn, &identity.email).await
}

/// Course admins are the course's admin roster plus every site admin.
pub async fn is_course_admin(
    courses: &CourseRepository,
    conn: &mut PgConnection,
    course: Tid,
    identity: &SessionIdentity,
    admin_groups: &[String],
) -> Result<bool, StorageError> {
    if is_site_admin(courses, conn, identity, admin_groups).await? {
        return Ok(true);
    }
    courses.is_course_admin(conn, course, &identity.email).await
}
