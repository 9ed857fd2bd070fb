//! Entry lifecycle handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use ohq_domain::{ApiError, EntryUpdateRequest, QueueEntry, SignupRequest, Tid};

use crate::AppState;
use crate::middleware::rate_limit::SIGNUP_LIMIT;
use crate::middleware::real_ip::RealIp;
use crate::middleware::session::ValidLogin;

/// `POST /queues/{id}/entries`
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    RealIp(ip): RealIp,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<QueueEntry>), ApiError> {
    let key = if viewer.email.is_empty() {
        ip
    } else {
        viewer.email.clone()
    };
    state.limiter.enforce("signup", &key, SIGNUP_LIMIT)?;

    let entry = state.service.signup(queue_id, &viewer, req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `PUT /queues/{id}/entries/{eid}`
pub async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path((queue_id, entry_id)): Path<(Tid, Tid)>,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<EntryUpdateRequest>,
) -> Result<Json<QueueEntry>, ApiError> {
    let entry = state
        .service
        .update_entry(queue_id, entry_id, &viewer, req)
        .await?;
    Ok(Json(entry))
}

/// `DELETE /queues/{id}/entries/{eid}`
pub async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Path((queue_id, entry_id)): Path<(Tid, Tid)>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state.service.remove_entry(queue_id, entry_id, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /queues/{id}/entries/{eid}/pin`
pub async fn pin_entry(
    State(state): State<Arc<AppState>>,
    Path((queue_id, entry_id)): Path<(Tid, Tid)>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state.service.pin_entry(queue_id, entry_id, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HelpingParams {
    pub helping: bool,
}

/// `PUT /queues/{id}/entries/{eid}/helping?helping=true|false`
pub async fn set_helping(
    State(state): State<Arc<AppState>>,
    Path((queue_id, entry_id)): Path<(Tid, Tid)>,
    Query(params): Query<HelpingParams>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .set_helping(queue_id, entry_id, &viewer, params.helping)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /queues/{id}/entries/{eid}/helped`
pub async fn set_not_helped(
    State(state): State<Arc<AppState>>,
    Path((queue_id, entry_id)): Path<(Tid, Tid)>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .set_not_helped(queue_id, entry_id, &viewer)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /queues/{id}/entries/randomize`
pub async fn randomize(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state.service.randomize(queue_id, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /queues/{id}/entries`: clear the whole queue.
pub async fn clear_queue(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state.service.clear_queue(queue_id, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}
