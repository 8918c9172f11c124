//! Alert CRUD + lifecycle + alert-event API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;

use rc_domain::alert::{self, AlertOperator};
use rc_store::alerts::{AlertEventFilter, AlertFilter, AlertUpdate, NewAlert};

use super::{api_error, domain_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/alerts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

pub async fn list_alerts(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let filter = AlertFilter {
        device_id: query.device_id,
        is_enabled: query.is_enabled,
        skip: query.skip,
        limit: query.limit,
    };
    match state.store.list_alerts(&filter).await {
        Ok(alerts) => Json(serde_json::json!({
            "alerts": alerts,
            "count": alerts.len(),
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/alerts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub device_id: i64,
    pub metric: String,
    pub operator: AlertOperator,
    pub threshold_value: f64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub trend_enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRequest>,
) -> Response {
    if let Err(msg) = alert::validate_definition(&req.metric, req.threshold_value) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, msg);
    }
    let device = match state.store.get_device(req.device_id).await {
        Ok(Some(d)) => d,
        Ok(None) => {
            return api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("device {} does not exist", req.device_id),
            )
        }
        Err(e) => return domain_error(e),
    };
    if !device.is_active {
        return api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("device {} is not active", device.id),
        );
    }
    // Trend analysis needs a stream of samples to work with.
    if req.trend_enabled && !device.poll_enabled {
        return api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "trend_enabled requires a device with poll_enabled",
        );
    }

    let new = NewAlert {
        device_id: req.device_id,
        metric: req.metric,
        operator: req.operator,
        threshold_value: req.threshold_value,
        is_enabled: req.is_enabled,
        trend_enabled: req.trend_enabled,
    };
    match state.store.create_alert(&new, Utc::now()).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "alert": created })),
        )
            .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/alerts/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_alert(id).await {
        Ok(Some(alert)) => Json(serde_json::json!({ "alert": alert })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "alert not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/alerts/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UpdateAlertRequest {
    pub metric: Option<String>,
    pub operator: Option<AlertOperator>,
    pub threshold_value: Option<f64>,
    pub trend_enabled: Option<bool>,
}

pub async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAlertRequest>,
) -> Response {
    if let Some(ref metric) = req.metric {
        if metric.is_empty() {
            return api_error(StatusCode::UNPROCESSABLE_ENTITY, "metric must not be empty");
        }
    }
    if let Some(threshold) = req.threshold_value {
        if threshold.is_nan() {
            return api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "threshold_value must not be NaN",
            );
        }
    }

    let update = AlertUpdate {
        metric: req.metric,
        operator: req.operator,
        threshold_value: req.threshold_value,
        trend_enabled: req.trend_enabled,
    };
    match state.store.update_alert(id, update, Utc::now()).await {
        Ok(Some(alert)) => Json(serde_json::json!({ "alert": alert })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "alert not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/alerts/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_alert(id).await {
        Ok(true) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "alert not found"),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/alerts/:id/enable | /disable
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn set_enabled(state: AppState, id: i64, enabled: bool) -> Response {
    let current = match state.store.get_alert(id).await {
        Ok(Some(a)) => a,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "alert not found"),
        Err(e) => return domain_error(e),
    };
    if current.is_enabled == enabled {
        let verb = if enabled { "enabled" } else { "disabled" };
        return api_error(StatusCode::BAD_REQUEST, format!("Alert is already {verb}"));
    }
    match state.store.set_alert_enabled(id, enabled, Utc::now()).await {
        Ok(Some(alert)) => Json(serde_json::json!({ "alert": alert })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "alert not found"),
        Err(e) => domain_error(e),
    }
}

pub async fn enable_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    set_enabled(state, id, true).await
}

pub async fn disable_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    set_enabled(state, id, false).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/alerts/events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub alert_id: Option<i64>,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub is_resolved: Option<bool>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventListQuery>,
) -> Response {
    let filter = AlertEventFilter {
        alert_id: query.alert_id,
        device_id: query.device_id,
        is_resolved: query.is_resolved,
        skip: query.skip,
        limit: query.limit,
    };
    match state.store.list_alert_events(&filter).await {
        Ok(events) => Json(serde_json::json!({
            "alert_events": events,
            "count": events.len(),
        }))
        .into_response(),
        Err(e) => domain_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/alerts/events/:id/resolve — manual resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn resolve_event(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_alert_event(id).await {
        Ok(Some(event)) if event.is_resolved => {
            api_error(StatusCode::BAD_REQUEST, "Alert event is already resolved")
        }
        Ok(Some(_)) => match state.store.resolve_alert_event(id, None, Utc::now()).await {
            Ok(_) => match state.store.get_alert_event(id).await {
                Ok(Some(event)) => {
                    Json(serde_json::json!({ "alert_event": event })).into_response()
                }
                Ok(None) => api_error(StatusCode::NOT_FOUND, "alert event not found"),
                Err(e) => domain_error(e),
            },
            Err(e) => domain_error(e),
        },
        Ok(None) => api_error(StatusCode::NOT_FOUND, "alert event not found"),
        Err(e) => domain_error(e),
    }
}
