//! Course and course-admin handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use ohq_domain::{
    ApiError, Course, CreateCourseRequest, CreateQueueRequest, Queue, SessionIdentity, Tid,
};

use crate::AppState;
use crate::middleware::rate_limit::CREATE_LIMIT;
use crate::middleware::real_ip::RealIp;
use crate::middleware::session::ValidLogin;

async fn require_site_admin(
    state: &AppState,
    conn: &mut sqlx::PgConnection,
    viewer: &SessionIdentity,
) -> Result<(), ApiError> {
    if state.service.is_site_admin(conn, viewer).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden("site admin required".to_string()))
    }
}

/// `GET /courses`
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Course>>, ApiError> {
    let mut tx = state.service.begin().await?;
    let courses = state.service.courses.list(tx.as_mut()).await?;
    Ok(Json(courses))
}

/// `POST /courses`: site admin, rate limited.
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    RealIp(ip): RealIp,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    let key = if viewer.email.is_empty() { ip } else { viewer.email.clone() };
    state.limiter.enforce("create", &key, CREATE_LIMIT)?;

    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("course name is required".to_string()));
    }

    let mut tx = state.service.begin().await?;
    require_site_admin(&state, tx.as_mut(), &viewer).await?;
    let course = state.service.courses.create(tx.as_mut(), &req.name).await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// `GET /courses/{id}`
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
) -> Result<Json<Course>, ApiError> {
    let mut tx = state.service.begin().await?;
    let course = state.service.courses.get(tx.as_mut(), course_id).await?;
    Ok(Json(course))
}

/// `PUT /courses/{id}`
pub async fn update_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<CreateCourseRequest>,
) -> Result<Json<Course>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("course name is required".to_string()));
    }
    let mut tx = state.service.begin().await?;
    require_site_admin(&state, tx.as_mut(), &viewer).await?;
    let course = state
        .service
        .courses
        .update(tx.as_mut(), course_id, &req.name)
        .await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok(Json(course))
}

/// `DELETE /courses/{id}`
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.service.begin().await?;
    require_site_admin(&state, tx.as_mut(), &viewer).await?;
    state.service.courses.delete(tx.as_mut(), course_id).await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /courses/{id}/queues`
pub async fn course_queues(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
) -> Result<Json<Vec<Queue>>, ApiError> {
    let mut tx = state.service.begin().await?;
    state.service.courses.get(tx.as_mut(), course_id).await?;
    let queues = state
        .service
        .queues
        .queues_for_course(tx.as_mut(), course_id)
        .await?;
    Ok(Json(queues))
}

/// `POST /courses/{id}/queues`: course admin, rate limited.
pub async fn create_queue(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    RealIp(ip): RealIp,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<CreateQueueRequest>,
) -> Result<(StatusCode, Json<Queue>), ApiError> {
    let key = if viewer.email.is_empty() { ip } else { viewer.email.clone() };
    state.limiter.enforce("create", &key, CREATE_LIMIT)?;

    let queue = state.service.create_queue(course_id, &viewer, req).await?;
    Ok((StatusCode::CREATED, Json(queue)))
}

/// `GET /courses/{id}/admins`
pub async fn get_admins(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut tx = state.service.begin().await?;
    if !state
        .service
        .is_course_admin(tx.as_mut(), course_id, &viewer)
        .await?
    {
        return Err(ApiError::Forbidden("course admin required".to_string()));
    }
    let admins = state.service.courses.admins(tx.as_mut(), course_id).await?;
    Ok(Json(admins))
}

/// `POST /courses/{id}/admins`: add emails.
pub async fn add_admins(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(emails): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.service.begin().await?;
    require_site_admin(&state, tx.as_mut(), &viewer).await?;
    state.service.courses.get(tx.as_mut(), course_id).await?;
    state
        .service
        .courses
        .add_admins(tx.as_mut(), course_id, &emails)
        .await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /courses/{id}/admins`: replace the set.
pub async fn set_admins(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(emails): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.service.begin().await?;
    require_site_admin(&state, tx.as_mut(), &viewer).await?;
    state.service.courses.get(tx.as_mut(), course_id).await?;
    state
        .service
        .courses
        .set_admins(tx.as_mut(), course_id, &emails)
        .await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /courses/{id}/admins`: remove emails.
pub async fn remove_admins(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(emails): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.service.begin().await?;
    require_site_admin(&state, tx.as_mut(), &viewer).await?;
    state.service.courses.get(tx.as_mut(), course_id).await?;
    state
        .service
        .courses
        .remove_admins(tx.as_mut(), course_id, &emails)
        .await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}
