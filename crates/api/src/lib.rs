//! Queue server library: state, router and middleware assembly.

pub mod bus;
pub mod capabilities;
pub mod handlers;
pub mod middleware;
pub mod presence;
pub mod service;
pub mod ws;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use ohq_config::AppConfig;
use ohq_storage::check_connection;
use sqlx::PgPool;

use crate::bus::EventBus;
use crate::handlers::oauth::OidcClient;
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::real_ip::RealIp;
use crate::middleware::request_id::MakeRequestTid;
use crate::middleware::session::SessionCodec;
use crate::presence::Presence;
use crate::service::QueueService;

/// Application state shared across handlers.
pub struct AppState {
    pub pool: PgPool,
    pub service: QueueService,
    pub bus: EventBus,
    pub presence: Presence,
    pub limiter: RateLimiter,
    pub sessions: SessionCodec,
    pub oidc: Option<Arc<OidcClient>>,
    pub config: AppConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, oidc: Option<Arc<OidcClient>>) -> Self {
        let bus = EventBus::new();
        let service = QueueService::new(
            pool.clone(),
            bus.clone(),
            config.site_admin_groups.clone(),
        );
        Self {
            pool,
            service,
            bus,
            presence: Presence::new(),
            limiter: RateLimiter::new(),
            sessions: SessionCodec::new(&config.session_key),
            oidc,
            config,
            start_time: Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Courses
        .route(
            "/courses",
            get(handlers::courses::list_courses).post(handlers::courses::create_course),
        )
        .route(
            "/courses/{id}",
            get(handlers::courses::get_course)
                .put(handlers::courses::update_course)
                .delete(handlers::courses::delete_course),
        )
        .route(
            "/courses/{id}/queues",
            get(handlers::courses::course_queues).post(handlers::courses::create_queue),
        )
        .route(
            "/courses/{id}/admins",
            get(handlers::courses::get_admins)
                .post(handlers::courses::add_admins)
                .put(handlers::courses::set_admins)
                .delete(handlers::courses::remove_admins),
        )
        // Queues
        .route(
            "/queues/{id}",
            get(handlers::queues::snapshot)
                .put(handlers::queues::update_queue)
                .delete(handlers::queues::delete_queue),
        )
        .route("/queues/{id}/ws", get(ws::queue_ws))
        .route("/queues/{id}/stack", get(handlers::queues::stack))
        // Entries
        .route(
            "/queues/{id}/entries",
            post(handlers::entries::signup).delete(handlers::entries::clear_queue),
        )
        .route(
            "/queues/{id}/entries/randomize",
            post(handlers::entries::randomize),
        )
        .route(
            "/queues/{id}/entries/{eid}",
            axum::routing::put(handlers::entries::update_entry)
                .delete(handlers::entries::remove_entry),
        )
        .route(
            "/queues/{id}/entries/{eid}/pin",
            post(handlers::entries::pin_entry),
        )
        .route(
            "/queues/{id}/entries/{eid}/helping",
            axum::routing::put(handlers::entries::set_helping),
        )
        .route(
            "/queues/{id}/entries/{eid}/helped",
            axum::routing::delete(handlers::entries::set_not_helped),
        )
        // Announcements
        .route(
            "/queues/{id}/announcements",
            post(handlers::announcements::add_announcement),
        )
        .route(
            "/queues/{id}/announcements/{aid}",
            axum::routing::delete(handlers::announcements::remove_announcement),
        )
        // Schedule and configuration
        .route(
            "/queues/{id}/schedule",
            get(handlers::queues::get_schedule).put(handlers::queues::update_schedule),
        )
        .route(
            "/queues/{id}/configuration",
            get(handlers::queues::get_configuration).put(handlers::queues::update_configuration),
        )
        .route(
            "/queues/{id}/configuration/manual-open",
            axum::routing::put(handlers::queues::set_manual_open),
        )
        // Messaging
        .route("/queues/{id}/messages", post(handlers::messages::send_message))
        // Roster and groups
        .route(
            "/queues/{id}/roster",
            get(handlers::roster::get_roster).put(handlers::roster::set_roster),
        )
        .route(
            "/queues/{id}/groups",
            get(handlers::roster::get_groups).put(handlers::roster::set_groups),
        )
        // Identity
        .route("/users/@me", get(handlers::users::me))
        .route("/users/@am-site-admin", get(handlers::users::am_site_admin))
        // Auth
        .route("/oauth2login", get(handlers::oauth::login))
        .route("/oauth2callback", get(handlers::oauth::callback))
        .route("/logout", get(handlers::oauth::logout))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-")
                    .to_string();
                let ip = request
                    .extensions()
                    .get::<RealIp>()
                    .map(|real_ip| real_ip.0.clone())
                    .unwrap_or_default();
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                    ip = %ip,
                )
            }),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::real_ip::resolve_real_ip,
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestTid))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Recovered panics become plain 500s; the detail goes to the log only.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("panic");
    tracing::error!(panic = detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "internal server error" })),
    )
        .into_response()
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

/// Readiness check endpoint.
async fn ready(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let database = match check_connection(&state.pool).await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };
    Json(json!({
        "status": if database == "connected" { "ok" } else { "degraded" },
        "database": database,
    }))
}
