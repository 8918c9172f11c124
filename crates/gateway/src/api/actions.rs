//! Device-action queue API: listing, manual creation, force-execute,
//! and terminal-row garbage collection.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use rc_domain::action::ActionStatus;
use rc_domain::schedule::{self, ActionType};
use rc_domain::Error;
use rc_store::actions::{ActionFilter, NewAction};

use super::{api_error, domain_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/schedules/device-actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<ActionStatus>,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub schedule_id: Option<i64>,
}

pub async fn list_actions(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let filter = ActionFilter {
        status: query.status,
        device_id: query.device_id,
        schedule_id: query.schedule_id,
        skip: query.skip,
        limit: query.limit,
    };
    match state.store.list_actions(&filter).await {
        Ok(actions) => Json(serde_json::json!({
            "device_actions": actions,
            "count": actions.len(),
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/schedules/device-actions — manual action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateActionRequest {
    pub device_id: i64,
    pub action_type: ActionType,
    #[serde(default = "default_params")]
    pub parameters: serde_json::Value,
    /// Defaults to "now" — an immediately dispatchable action.
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
}

fn default_params() -> serde_json::Value {
    serde_json::json!({})
}

pub async fn create_action(
    State(state): State<AppState>,
    Json(req): Json<CreateActionRequest>,
) -> Response {
    if let Err(msg) = schedule::validate_action_params(req.action_type, &req.parameters) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, msg);
    }
    match state.store.get_device(req.device_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("device {} does not exist", req.device_id),
            )
        }
        Err(e) => return domain_error(e),
    }

    let now = Utc::now();
    let new = NewAction {
        schedule_id: None,
        device_id: req.device_id,
        action_type: req.action_type,
        parameters: req.parameters,
        scheduled_time: req.scheduled_time.unwrap_or(now),
    };
    match state.store.create_manual_action(&new, now).await {
        Ok(action) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "device_action": action })),
        )
            .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/schedules/device-actions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_action(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_action(id).await {
        Ok(Some(action)) => Json(serde_json::json!({ "device_action": action })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "device action not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/schedules/device-actions/:id/execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn execute_action(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_action(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "device action not found"),
        Err(e) => return domain_error(e),
    }
    match state.scheduler.execute_action(id).await {
        Ok(status) => {
            let action = match state.store.get_action(id).await {
                Ok(Some(a)) => a,
                Ok(None) => return api_error(StatusCode::NOT_FOUND, "device action not found"),
                Err(e) => return domain_error(e),
            };
            Json(serde_json::json!({
                "status": status,
                "device_action": action,
            }))
            .into_response()
        }
        Err(Error::Conflict(_)) => api_error(StatusCode::BAD_REQUEST, "Action is not pending"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/schedules/device-actions/cleanup?days
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

pub async fn cleanup(State(state): State<AppState>, Query(query): Query<CleanupQuery>) -> Response {
    match state.scheduler.cleanup(query.days).await {
        Ok(removed) => Json(serde_json::json!({
            "removed": removed,
            "days": query.days,
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}
