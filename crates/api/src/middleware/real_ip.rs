//! Client IP resolution.
//!
//! The service is designed to sit behind a trusted reverse proxy, so the
//! client address comes from `X-Forwarded-For`. In production a missing
//! header is a deployment fault and the request fails; in development we fall
//! back to the socket peer.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use ohq_domain::ApiError;

use crate::AppState;

/// The resolved client address, available as a request extension.
#[derive(Debug, Clone)]
pub struct RealIp(pub String);

pub async fn resolve_real_ip(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    let ip = match forwarded {
        Some(ip) => ip,
        None if state.config.production => {
            tracing::error!("missing X-Forwarded-For header in production mode");
            return ApiError::internal(anyhow::anyhow!(
                "missing X-Forwarded-For behind trusted proxy"
            ))
            .into_response();
        }
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string()),
    };

    request.extensions_mut().insert(RealIp(ip));
    next.run(request).await
}

impl<S: Send + Sync> FromRequestParts<S> for RealIp {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RealIp>()
            .cloned()
            .ok_or_else(|| ApiError::internal(anyhow::anyhow!("real IP middleware not installed")))
    }
}
