//! Roster and group handlers. Both surfaces carry student emails, so every
//! endpoint is admin-gated.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use ohq_domain::{ApiError, Tid};

use crate::AppState;
use crate::middleware::session::ValidLogin;

async fn require_admin(
    state: &AppState,
    conn: &mut sqlx::PgConnection,
    queue_id: Tid,
    viewer: &ohq_domain::SessionIdentity,
) -> Result<(), ApiError> {
    let queue = state.service.queues.get_queue(conn, queue_id).await?;
    if state
        .service
        .is_course_admin(conn, queue.course, viewer)
        .await?
    {
        Ok(())
    } else {
        Err(ApiError::Forbidden("course admin required".to_string()))
    }
}

/// `GET /queues/{id}/roster`
pub async fn get_roster(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut tx = state.service.begin().await?;
    require_admin(&state, tx.as_mut(), queue_id, &viewer).await?;
    let roster = state.service.roster.roster(tx.as_mut(), queue_id).await?;
    Ok(Json(roster))
}

/// `PUT /queues/{id}/roster`: bulk replace.
pub async fn set_roster(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(emails): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.service.begin().await?;
    require_admin(&state, tx.as_mut(), queue_id, &viewer).await?;
    state
        .service
        .roster
        .set_roster(tx.as_mut(), queue_id, &emails)
        .await?;
    tx.commit().await.map_err(ApiError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /queues/{id}/groups`
pub async fn get_groups(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<Json<Vec<Vec<String>>>, ApiError> {
    let mut tx = state.service.begin().await?;
    require_admin(&state, tx.as_mut(), queue_id, &viewer).await?;
    let groups = state.service.roster.groups(tx.as_mut(), queue_id).await?;
    Ok(Json(groups))
}

/// `PUT /queues/{id}/groups`: bulk replace; body is a list of email lists.
pub async fn set_groups(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(groups): Json<Vec<Vec<String>>>,
) -> Result<StatusCode, ApiError> {
    state.service.set_groups(queue_id, &viewer, groups).await?;
    Ok(StatusCode::NO_CONTENT)
}
