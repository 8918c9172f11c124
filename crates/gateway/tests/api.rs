//! REST facade integration tests: the full router over an in-memory
//! store, driven with `tower::ServiceExt::oneshot`. No auth tokens are
//! configured, so the middleware runs in dev mode.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt;

use rc_domain::config::Config;
use rc_drivers::{DriverRegistry, SimulatedController};
use rc_gateway::api;
use rc_gateway::state::AppState;
use rc_gateway::workers::{AlertWorker, PollerWorker, SchedulerWorker};
use rc_store::Store;
use rc_timing::SystemClock;

async fn test_app() -> (axum::Router, Store) {
    let store = Store::memory().await.unwrap();
    let config = Arc::new(Config::default());
    let clock = Arc::new(SystemClock);

    let scheduler = Arc::new(SchedulerWorker::new(
        store.clone(),
        Arc::new(SimulatedController),
        clock.clone(),
        30,
    ));
    let poller = PollerWorker::new(
        store.clone(),
        Arc::new(DriverRegistry::simulated()),
        clock.clone(),
        300,
        90,
    );
    let alerts = Arc::new(AlertWorker::new(store.clone(), clock, 30));

    let state = AppState {
        config,
        store: store.clone(),
        scheduler,
        poller,
        alerts,
        api_token_hash: None,
        service_token_hash: None,
    };
    (api::router(state.clone()).with_state(state), store)
}

async fn request(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_device(app: &axum::Router) -> i64 {
    let (status, body) = request(
        app,
        Method::POST,
        "/v1/devices",
        Some(serde_json::json!({
            "name": "return pump",
            "device_type": "outlet",
            "address": "kasa://10.0.0.12",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["device"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = test_app().await;
    let (status, body) = request(&app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn schedule_crud_lifecycle() {
    let (app, _) = test_app().await;
    let device_id = create_device(&app).await;

    let (status, body) = request(
        &app,
        Method::POST,
        "/v1/schedules",
        Some(serde_json::json!({
            "name": "night mode",
            "schedule_type": "cron",
            "cron_expression": "0 22 * * *",
            "timezone": "America/Los_Angeles",
            "device_ids": [device_id],
            "action_type": "off",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["schedule"]["id"].as_i64().unwrap();

    let (status, body) = request(&app, Method::GET, &format!("/v1/schedules/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule"]["name"], "night mode");

    // Enabling an already-enabled schedule is a conflict.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/v1/schedules/{id}/enable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Schedule is already enabled");

    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/v1/schedules/{id}/disable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // disable(enable(s)) round-trips the user-facing fields.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/v1/schedules/{id}/enable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule"]["cron_expression"], "0 22 * * *");
    assert_eq!(body["schedule"]["is_enabled"], true);

    let (status, _) = request(&app, Method::DELETE, &format!("/v1/schedules/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, Method::GET, &format!("/v1/schedules/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schedule_validation_errors_are_422() {
    let (app, _) = test_app().await;
    let device_id = create_device(&app).await;

    // Bad cron grammar.
    let (status, body) = request(
        &app,
        Method::POST,
        "/v1/schedules",
        Some(serde_json::json!({
            "name": "broken",
            "schedule_type": "cron",
            "cron_expression": "61 * * * *",
            "device_ids": [device_id],
            "action_type": "on",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("minute"));

    // Unknown timezone.
    let (status, _) = request(
        &app,
        Method::POST,
        "/v1/schedules",
        Some(serde_json::json!({
            "name": "lost",
            "schedule_type": "cron",
            "cron_expression": "0 * * * *",
            "timezone": "Atlantis/Underwater",
            "device_ids": [device_id],
            "action_type": "on",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // set_pwm target out of range.
    let (status, _) = request(
        &app,
        Method::POST,
        "/v1/schedules",
        Some(serde_json::json!({
            "name": "too bright",
            "schedule_type": "one_off",
            "start_time": "2099-01-01T00:00:00Z",
            "device_ids": [device_id],
            "action_type": "set_pwm",
            "action_params": {"target": 150},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Unknown device reference.
    let (status, _) = request(
        &app,
        Method::POST,
        "/v1/schedules",
        Some(serde_json::json!({
            "name": "ghost",
            "schedule_type": "one_off",
            "start_time": "2099-01-01T00:00:00Z",
            "device_ids": [9999],
            "action_type": "on",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn manual_action_execute_and_conflict() {
    let (app, _) = test_app().await;
    let device_id = create_device(&app).await;

    let (status, body) = request(
        &app,
        Method::POST,
        "/v1/schedules/device-actions",
        Some(serde_json::json!({
            "device_id": device_id,
            "action_type": "on",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["device_action"]["id"].as_i64().unwrap();
    assert_eq!(body["device_action"]["status"], "pending");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/v1/schedules/device-actions/{id}/execute"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["device_action"]["status"], "success");

    // Executing a terminal action is a conflict.
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/v1/schedules/device-actions/{id}/execute"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Action is not pending");
}

#[tokio::test]
async fn cleanup_validates_days_range() {
    let (app, _) = test_app().await;
    let (status, _) = request(
        &app,
        Method::POST,
        "/v1/schedules/device-actions/cleanup?days=0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = request(
        &app,
        Method::POST,
        "/v1/schedules/device-actions/cleanup?days=30",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
}

#[tokio::test]
async fn device_history_round_trips() {
    let (app, store) = test_app().await;
    let device_id = create_device(&app).await;
    for i in 0..3 {
        store
            .insert_reading(&rc_store::readings::NewReading {
                device_id,
                timestamp: chrono::Utc::now() - chrono::Duration::minutes(3 - i),
                value: Some(25.0 + i as f64),
                json_value: None,
                metadata: None,
            })
            .await
            .unwrap();
    }

    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/v1/devices/{device_id}/history?limit=2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["readings"][0]["value"], 27.0);

    let (status, _) = request(&app, Method::GET, "/v1/devices/999/history", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alert_crud_and_trend_guard() {
    let (app, _) = test_app().await;
    let device_id = create_device(&app).await;

    // trend_enabled on a non-polling device is rejected.
    let (status, _) = request(
        &app,
        Method::POST,
        "/v1/alerts",
        Some(serde_json::json!({
            "device_id": device_id,
            "metric": "value",
            "operator": ">",
            "threshold_value": 82.0,
            "trend_enabled": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = request(
        &app,
        Method::POST,
        "/v1/alerts",
        Some(serde_json::json!({
            "device_id": device_id,
            "metric": "value",
            "operator": ">",
            "threshold_value": 82.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["alert"]["id"].as_i64().unwrap();
    assert_eq!(body["alert"]["operator"], ">");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/v1/alerts/{id}/disable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alert"]["is_enabled"], false);

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/v1/alerts/{id}/disable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Alert is already disabled");
}

#[tokio::test]
async fn list_pagination_clamps_limit() {
    let (app, _) = test_app().await;
    // limit above the cap must not error; it is clamped server-side.
    let (status, _) = request(&app, Method::GET, "/v1/devices?limit=100000", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, Method::GET, "/v1/devices?skip=5&limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn scheduler_health_and_stats_endpoints() {
    let (app, _) = test_app().await;
    let (status, body) = request(&app, Method::GET, "/v1/schedules/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["uptime_seconds"].is_i64());

    let (status, body) = request(&app, Method::GET, "/v1/schedules/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedules"]["total"], 0);
    assert_eq!(body["device_actions"]["total"], 0);
}
