//! Schedule CRUD + lifecycle + stats API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use rc_domain::schedule::{self, ActionType, ScheduleType};
use rc_store::schedules::{NewSchedule, ScheduleFilter, ScheduleUpdate};
use rc_timing::validate_timing;

use super::{api_error, domain_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/schedules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub schedule_type: Option<ScheduleType>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub device_id: Option<i64>,
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = ScheduleFilter {
        schedule_type: query.schedule_type,
        is_enabled: query.is_enabled,
        device_id: query.device_id,
        skip: query.skip,
        limit: query.limit,
    };
    match state.store.list_schedules(&filter).await {
        Ok(schedules) => Json(serde_json::json!({
            "schedules": schedules,
            "count": schedules.len(),
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/schedules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<i64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub device_ids: Vec<i64>,
    pub action_type: ActionType,
    #[serde(default = "default_params")]
    pub action_params: serde_json::Value,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_true() -> bool {
    true
}
fn default_params() -> serde_json::Value {
    serde_json::json!({})
}

/// Full boundary validation for create/update: structural rules, action
/// parameters, timezone + cron grammar + recurring pattern.
fn validate_request(req: &CreateScheduleRequest) -> Result<(), String> {
    schedule::validate_definition(
        req.schedule_type,
        req.cron_expression.as_deref(),
        req.interval_seconds,
        req.start_time,
        req.end_time,
        &req.device_ids,
    )?;
    schedule::validate_action_params(req.action_type, &req.action_params)?;
    validate_timing(
        req.schedule_type,
        req.cron_expression.as_deref(),
        &req.timezone,
        &req.action_params,
    )
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Response {
    if let Err(msg) = validate_request(&req) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, msg);
    }
    // Every referenced device must exist.
    for device_id in &req.device_ids {
        match state.store.get_device(*device_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return api_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("device {device_id} does not exist"),
                )
            }
            Err(e) => return domain_error(e),
        }
    }

    let new = NewSchedule {
        name: req.name,
        schedule_type: req.schedule_type,
        cron_expression: req.cron_expression,
        interval_seconds: req.interval_seconds,
        start_time: req.start_time,
        end_time: req.end_time,
        timezone: req.timezone,
        device_ids: req.device_ids,
        action_type: req.action_type,
        action_params: req.action_params,
        is_enabled: req.is_enabled,
    };
    match state.store.create_schedule(new, Utc::now()).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "schedule": created })),
        )
            .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/schedules/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_schedule(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_schedule(id).await {
        Ok(Some(schedule)) => Json(serde_json::json!({ "schedule": schedule })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "schedule not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/schedules/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub cron_expression: Option<Option<String>>,
    pub interval_seconds: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub device_ids: Option<Vec<i64>>,
    pub action_params: Option<serde_json::Value>,
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Response {
    let current = match state.store.get_schedule(id).await {
        Ok(Some(s)) => s,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "schedule not found"),
        Err(e) => return domain_error(e),
    };

    // Validate the merged definition, not just the patch.
    let merged = CreateScheduleRequest {
        name: req.name.clone().unwrap_or_else(|| current.name.clone()),
        schedule_type: current.schedule_type,
        cron_expression: req
            .cron_expression
            .clone()
            .unwrap_or_else(|| current.cron_expression.clone()),
        interval_seconds: req.interval_seconds.or(current.interval_seconds),
        start_time: req.start_time.or(current.start_time),
        end_time: req.end_time.or(current.end_time),
        timezone: req.timezone.clone().unwrap_or_else(|| current.timezone.clone()),
        device_ids: req
            .device_ids
            .clone()
            .unwrap_or_else(|| current.device_ids.clone()),
        action_type: current.action_type,
        action_params: req
            .action_params
            .clone()
            .unwrap_or_else(|| current.action_params.clone()),
        is_enabled: current.is_enabled,
    };
    if let Err(msg) = validate_request(&merged) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, msg);
    }

    let update = ScheduleUpdate {
        name: req.name,
        cron_expression: req.cron_expression,
        interval_seconds: req.interval_seconds.map(Some),
        start_time: req.start_time.map(Some),
        end_time: req.end_time.map(Some),
        timezone: req.timezone,
        device_ids: req.device_ids,
        action_params: req.action_params,
    };
    let now = Utc::now();
    match state.store.update_schedule(id, update, now).await {
        Ok(Some(updated)) => {
            // The timing definition may have changed; clear next_run so
            // the scheduler recomputes on its next tick.
            if let Err(e) = state.store.advance_schedule(id, None, now).await {
                return domain_error(e);
            }
            Json(serde_json::json!({ "schedule": updated })).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "schedule not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/schedules/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_schedule(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_schedule(id).await {
        Ok(true) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "schedule not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/schedules/:id/enable | /disable
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn set_enabled(state: AppState, id: i64, enabled: bool) -> Response {
    let current = match state.store.get_schedule(id).await {
        Ok(Some(s)) => s,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "schedule not found"),
        Err(e) => return domain_error(e),
    };
    if current.is_enabled == enabled {
        let verb = if enabled { "enabled" } else { "disabled" };
        return api_error(StatusCode::BAD_REQUEST, format!("Schedule is already {verb}"));
    }
    match state.store.set_schedule_enabled(id, enabled, Utc::now()).await {
        Ok(Some(schedule)) => Json(serde_json::json!({ "schedule": schedule })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "schedule not found"),
        Err(e) => domain_error(e),
    }
}

pub async fn enable_schedule(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    set_enabled(state, id, true).await
}

pub async fn disable_schedule(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    set_enabled(state, id, false).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/schedules/stats | /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stats(State(state): State<AppState>) -> Response {
    let schedules = match state.store.schedule_stats().await {
        Ok(s) => s,
        Err(e) => return domain_error(e),
    };
    let actions = match state.store.action_stats().await {
        Ok(a) => a,
        Err(e) => return domain_error(e),
    };
    Json(serde_json::json!({
        "schedules": schedules,
        "device_actions": actions,
    }))
    .into_response()
}

pub async fn scheduler_health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!(state.scheduler.health())).into_response()
}
