//! Identity endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use ohq_domain::{ApiError, SessionIdentity};

use crate::AppState;
use crate::middleware::session::ValidLogin;

/// `GET /users/@me`
pub async fn me(ValidLogin(viewer): ValidLogin) -> Json<SessionIdentity> {
    Json(viewer)
}

/// `GET /users/@am-site-admin`: forward-auth check: 200 or 403.
pub async fn am_site_admin(
    State(state): State<Arc<AppState>>,
    ValidLogin(viewer): ValidLogin,
) -> Result<StatusCode, ApiError> {
    let mut tx = state.service.begin().await?;
    if state.service.is_site_admin(tx.as_mut(), &viewer).await? {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::Forbidden("site admin required".to_string()))
    }
}
