//! REST facade: thin CRUD + lifecycle handlers over the store and
//! workers. Every error body is `{ "detail": "..." }`.

pub mod actions;
pub mod alerts;
pub mod auth;
pub mod devices;
pub mod schedules;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;

use rc_domain::Error;

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "detail": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

/// Map a domain error onto the HTTP taxonomy.
pub(crate) fn domain_error(err: Error) -> Response {
    match err {
        Error::Validation(msg) => api_error(StatusCode::UNPROCESSABLE_ENTITY, msg),
        Error::NotFound { resource, id } => {
            api_error(StatusCode::NOT_FOUND, format!("{resource} {id} not found"))
        }
        Error::Conflict(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        other => {
            tracing::error!(error = %other, "internal error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health — lightweight liveness probe (public, no auth)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware). `state` is needed to wire
/// up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        // Schedules
        .route("/v1/schedules", get(schedules::list_schedules))
        .route("/v1/schedules", post(schedules::create_schedule))
        .route("/v1/schedules/stats", get(schedules::stats))
        .route("/v1/schedules/health", get(schedules::scheduler_health))
        // Device actions (the materialized queue) — registered before
        // `/:id` so the literal segment wins.
        .route("/v1/schedules/device-actions", get(actions::list_actions))
        .route("/v1/schedules/device-actions", post(actions::create_action))
        .route(
            "/v1/schedules/device-actions/cleanup",
            post(actions::cleanup),
        )
        .route("/v1/schedules/device-actions/:id", get(actions::get_action))
        .route(
            "/v1/schedules/device-actions/:id/execute",
            post(actions::execute_action),
        )
        .route("/v1/schedules/:id", get(schedules::get_schedule))
        .route("/v1/schedules/:id", put(schedules::update_schedule))
        .route("/v1/schedules/:id", delete(schedules::delete_schedule))
        .route("/v1/schedules/:id/enable", post(schedules::enable_schedule))
        .route("/v1/schedules/:id/disable", post(schedules::disable_schedule))
        // Devices
        .route("/v1/devices", get(devices::list_devices))
        .route("/v1/devices", post(devices::create_device))
        .route("/v1/devices/poller/status", get(devices::poller_status))
        .route("/v1/devices/:id", get(devices::get_device))
        .route("/v1/devices/:id", put(devices::update_device))
        .route("/v1/devices/:id", delete(devices::delete_device))
        .route("/v1/devices/:id/history", get(devices::history))
        // Alerts
        .route("/v1/alerts", get(alerts::list_alerts))
        .route("/v1/alerts", post(alerts::create_alert))
        .route("/v1/alerts/events", get(alerts::list_events))
        .route("/v1/alerts/events/:id/resolve", post(alerts::resolve_event))
        .route("/v1/alerts/:id", get(alerts::get_alert))
        .route("/v1/alerts/:id", put(alerts::update_alert))
        .route("/v1/alerts/:id", delete(alerts::delete_alert))
        .route("/v1/alerts/:id/enable", post(alerts::enable_alert))
        .route("/v1/alerts/:id/disable", post(alerts::disable_alert))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    public.merge(protected)
}
