//! Ephemeral staff messaging.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use ohq_domain::{ApiError, MessageRequest, Tid};

use crate::AppState;
use crate::middleware::session::ValidLogin;

/// `POST /queues/{id}/messages`
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<MessageRequest>,
) -> Result<StatusCode, ApiError> {
    state.service.send_message(queue_id, &viewer, req).await?;
    Ok(StatusCode::CREATED)
}
