//! Announcement handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use ohq_domain::{Announcement, AnnouncementRequest, ApiError, Tid};

use crate::AppState;
use crate::middleware::session::ValidLogin;

/// `POST /queues/{id}/announcements`
pub async fn add_announcement(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<AnnouncementRequest>,
) -> Result<(StatusCode, Json<Announcement>), ApiError> {
    let announcement = state.service.add_announcement(queue_id, &viewer, req).await?;
    Ok((StatusCode::CREATED, Json(announcement)))
}

/// `DELETE /queues/{id}/announcements/{aid}`
pub async fn remove_announcement(
    State(state): State<Arc<AppState>>,
    Path((queue_id, announcement_id)): Path<(Tid, Tid)>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .remove_announcement(queue_id, announcement_id, &viewer)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
