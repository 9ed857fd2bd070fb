//! The HTTP-facing error type with status code mappings.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::session::SESSION_COOKIE;

/// Response body for every error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Errors surfaced to clients, each with a fixed status code. Everything a
/// handler cannot name maps to `Internal` and never leaks backend text.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400 Bad Request
    #[error("{0}")]
    Validation(String),

    /// 401 Unauthorized; the response also invalidates the session cookie
    #[error("{0}")]
    Unauthenticated(String),

    /// 403 Forbidden
    #[error("{0}")]
    Forbidden(String),

    /// 404 Not Found
    #[error("{0}")]
    NotFound(String),

    /// 409 Conflict
    #[error("{0}")]
    Conflict(String),

    /// 429 Too Many Requests; `reset` is unix seconds when the bucket opens
    #[error("rate limit exceeded")]
    RateLimited { reset: i64 },

    /// 500 Internal Server Error
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ApiError::Internal(err) = &self {
            tracing::error!(error = %err, "internal error");
        }

        let message = match &self {
            // Never leak backend details.
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorBody { message })).into_response();

        match self {
            ApiError::Unauthenticated(_) => {
                // Whatever cookie the client sent is no good; clear it.
                let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
            }
            ApiError::RateLimited { reset } => {
                if let Ok(value) = HeaderValue::from_str(&reset.to_string()) {
                    response.headers_mut().insert("x-ratelimit-reset", value);
                }
            }
            _ => {}
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited { reset: 0 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn unauthenticated_clears_the_cookie() {
        let response = ApiError::Unauthenticated("no session".into()).into_response();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("ohq_session="));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn rate_limited_sets_reset_header() {
        let response = ApiError::RateLimited { reset: 1_700_000_123 }.into_response();
        assert_eq!(
            response.headers().get("x-ratelimit-reset").unwrap(),
            "1700000123"
        );
    }
}
