//! Queue read/write handlers: snapshot, stack, configuration, schedule.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use ohq_domain::{
    ApiError, ConfigurationUpdateRequest, EntryView, Queue, QueueConfiguration, QueueSnapshot,
    QueueUpdateRequest, Tid, policy,
};

use crate::AppState;
use crate::middleware::session::{MaybeIdentity, ValidLogin};
use crate::service::STACK_LIMIT;

/// `GET /queues/{id}`: the full view a just-connected client needs.
///
/// Admins see every field plus the archived stack and the online list;
/// everyone else gets anonymized entries, except their own.
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    MaybeIdentity(viewer): MaybeIdentity,
) -> Result<Json<QueueSnapshot>, ApiError> {
    let mut tx = state.service.begin().await?;
    let queue = state.service.queues.get_queue(tx.as_mut(), queue_id).await?;
    let config = state
        .service
        .queues
        .get_configuration(tx.as_mut(), queue_id)
        .await?;

    let is_admin = match &viewer {
        Some(viewer) => {
            state
                .service
                .is_course_admin(tx.as_mut(), queue.course, viewer)
                .await?
        }
        None => false,
    };
    let viewer_email = viewer.map(|v| v.email);

    let mut entries = state
        .service
        .entries
        .active_entries(tx.as_mut(), queue_id)
        .await?;
    policy::sort_for_display(&mut entries);

    let entry_views = entries
        .into_iter()
        .map(|entry| {
            if is_admin || viewer_email.as_deref() == Some(entry.email.as_str()) {
                EntryView::Full(entry)
            } else {
                EntryView::Anonymous(entry.anonymized())
            }
        })
        .collect();

    let stack = if is_admin {
        Some(
            state
                .service
                .entries
                .stack(tx.as_mut(), queue_id, STACK_LIMIT)
                .await?,
        )
    } else {
        None
    };

    let announcements = state
        .service
        .queues
        .announcements(tx.as_mut(), queue_id)
        .await?;
    let (open, half_hour, schedule) = state.service.open_status(tx.as_mut(), &config).await?;

    let online = is_admin.then(|| state.presence.online(queue_id));

    Ok(Json(QueueSnapshot {
        entries: entry_views,
        stack,
        configuration: config,
        schedule,
        open,
        announcements,
        half_hour,
        online,
    }))
}

/// `PUT /queues/{id}`
pub async fn update_queue(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<QueueUpdateRequest>,
) -> Result<Json<Queue>, ApiError> {
    let queue = state.service.update_queue(queue_id, &viewer, req).await?;
    Ok(Json(queue))
}

/// `DELETE /queues/{id}`
pub async fn delete_queue(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state.service.delete_queue(queue_id, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /queues/{id}/stack`: admin-only recent history.
pub async fn stack(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
) -> Result<Json<Vec<ohq_domain::QueueEntry>>, ApiError> {
    let mut tx = state.service.begin().await?;
    let queue = state.service.queues.get_queue(tx.as_mut(), queue_id).await?;
    if !state
        .service
        .is_course_admin(tx.as_mut(), queue.course, &viewer)
        .await?
    {
        return Err(ApiError::Forbidden("course admin required".to_string()));
    }
    let stack = state
        .service
        .entries
        .stack(tx.as_mut(), queue_id, STACK_LIMIT)
        .await?;
    Ok(Json(stack))
}

/// `GET /queues/{id}/configuration`
pub async fn get_configuration(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
) -> Result<Json<QueueConfiguration>, ApiError> {
    let mut tx = state.service.begin().await?;
    let config = state
        .service
        .queues
        .get_configuration(tx.as_mut(), queue_id)
        .await?;
    Ok(Json(config))
}

/// `PUT /queues/{id}/configuration`
pub async fn update_configuration(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(req): Json<ConfigurationUpdateRequest>,
) -> Result<Json<QueueConfiguration>, ApiError> {
    let config = state
        .service
        .update_configuration(queue_id, &viewer, req)
        .await?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct OpenParams {
    pub open: bool,
}

/// `PUT /queues/{id}/configuration/manual-open?open=true|false`
pub async fn set_manual_open(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    Query(params): Query<OpenParams>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    state.service.set_open(queue_id, &viewer, params.open).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /queues/{id}/schedule`: the week's 7 schedule strings.
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut tx = state.service.begin().await?;
    // 404 for unknown queues, not an empty list.
    state.service.queues.get_queue(tx.as_mut(), queue_id).await?;
    let week = state.service.queues.get_schedule(tx.as_mut(), queue_id).await?;
    Ok(Json(week))
}

/// `PUT /queues/{id}/schedule`
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    ValidLogin(viewer): ValidLogin,
    Json(days): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    state.service.update_schedule(queue_id, &viewer, days).await?;
    Ok(StatusCode::NO_CONTENT)
}
