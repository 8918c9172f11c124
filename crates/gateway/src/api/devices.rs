//! Device registry API + readings history retrieval.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use rc_domain::device;
use rc_store::devices::{DeviceFilter, DeviceUpdate, NewDevice};
use rc_store::readings::HistoryQuery;

use super::{api_error, domain_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/devices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub poll_enabled: Option<bool>,
}

pub async fn list_devices(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let filter = DeviceFilter {
        device_type: query.device_type,
        is_active: query.is_active,
        poll_enabled: query.poll_enabled,
        skip: query.skip,
        limit: query.limit,
    };
    match state.store.list_devices(&filter).await {
        Ok(devices) => Json(serde_json::json!({
            "devices": devices,
            "count": devices.len(),
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/devices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub poll_enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
}

fn default_poll_interval() -> i64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_config() -> serde_json::Value {
    serde_json::json!({})
}

pub async fn create_device(
    State(state): State<AppState>,
    Json(req): Json<CreateDeviceRequest>,
) -> Response {
    if let Err(msg) = device::validate_definition(&req.name, &req.device_type, req.poll_interval) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, msg);
    }
    let new = NewDevice {
        name: req.name,
        device_type: req.device_type,
        address: req.address,
        poll_enabled: req.poll_enabled,
        poll_interval: req.poll_interval,
        is_active: req.is_active,
        config: req.config,
    };
    match state.store.create_device(&new, Utc::now()).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "device": created })),
        )
            .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/devices/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_device(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_device(id).await {
        Ok(Some(device)) => Json(serde_json::json!({ "device": device })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/devices/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub address: Option<String>,
    pub poll_enabled: Option<bool>,
    pub poll_interval: Option<i64>,
    pub is_active: Option<bool>,
    pub config: Option<serde_json::Value>,
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateDeviceRequest>,
) -> Response {
    if let Some(interval) = req.poll_interval {
        if interval < 1 {
            return api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("poll_interval must be >= 1 second (got {interval})"),
            );
        }
    }
    if req.name.as_deref() == Some("") {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "name must not be empty");
    }

    let update = DeviceUpdate {
        name: req.name,
        device_type: req.device_type,
        address: req.address,
        poll_enabled: req.poll_enabled,
        poll_interval: req.poll_interval,
        is_active: req.is_active,
        config: req.config,
    };
    match state.store.update_device(id, update, Utc::now()).await {
        Ok(Some(device)) => Json(serde_json::json!({ "device": device })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/devices/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_device(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_device(id).await {
        Ok(true) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/devices/:id/history?start&end&limit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Response {
    match state.store.get_device(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "device not found"),
        Err(e) => return domain_error(e),
    }
    if let (Some(start), Some(end)) = (params.start, params.end) {
        if end < start {
            return api_error(StatusCode::UNPROCESSABLE_ENTITY, "end must not precede start");
        }
    }

    let query = HistoryQuery {
        start: params.start,
        end: params.end,
        limit: params.limit,
    };
    match state.store.reading_history(id, &query).await {
        Ok(readings) => Json(serde_json::json!({
            "device_id": id,
            "readings": readings,
            "count": readings.len(),
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/devices/poller/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn poller_status(State(state): State<AppState>) -> Response {
    Json(serde_json::json!(state.poller.status().await)).into_response()
}
