use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::post,
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use growmon_web::{create_app, AppState, WebConfig};

/// Helper to create test app state backed by a throwaway database. The
/// TempDir must stay alive for the duration of the test.
async fn create_test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = WebConfig {
        database_url: format!("sqlite://{}/test.db", dir.path().display()),
        ..WebConfig::default()
    };
    let state = AppState::new(config)
        .await
        .expect("Failed to create test state");
    (state, dir)
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Stub webhook receiver that records every body it is sent.
async fn spawn_receiver() -> (String, Arc<Mutex<Vec<String>>>) {
    let bodies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let state = bodies.clone();

    let app = Router::new().route(
        "/hook",
        post(
            |axum::extract::State(bodies): axum::extract::State<Arc<Mutex<Vec<String>>>>,
             body: String| async move {
                bodies.lock().unwrap().push(body);
                StatusCode::OK
            },
        ),
    )
    .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), bodies)
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn ingest_rejects_missing_temperature() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, body) = send_json(&app, "POST", "/api/sensors", json!({ "humidity": 50.0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn ingest_evaluates_thresholds_and_delivers_webhook() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/thresholds",
        json!({
            "name": "temp-high",
            "metric": "temperature",
            "condition": "gt",
            "value": 85.0,
            "severity": "critical"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Preference with the webhook channel enabled so the alert fans out.
    let (status, _) = send_json(
        &app,
        "POST",
        "/api/preferences",
        json!({ "event_type": "*", "min_severity": "info", "webhook": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (receiver_url, bodies) = spawn_receiver().await;
    let (status, _) = send_json(
        &app,
        "POST",
        "/api/webhooks",
        json!({
            "name": "ops",
            "url": receiver_url,
            "events": ["sensor_threshold"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/sensors",
        json!({ "temperature": 90.0, "humidity": 50.0, "roomId": "veg-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let alerts = body["alerts"].as_array().expect("alerts array");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["severity"], "critical");
    let alert_id = alerts[0]["id"].as_str().unwrap().to_string();

    // Fan-out runs off the request path; poll for the delivery.
    let mut delivered = None;
    for _ in 0..40 {
        if let Some(first) = bodies.lock().unwrap().first().cloned() {
            delivered = Some(first);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let delivered = delivered.expect("webhook was not delivered");
    let payload: Value = serde_json::from_str(&delivered).unwrap();
    assert_eq!(payload["event"], "sensor_threshold");
    assert_eq!(payload["data"]["alert_id"], alert_id.as_str());

    // The alert is also queryable and starts unacknowledged.
    let (status, listed) = get_json(&app, "/api/alerts?severity=critical").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["acknowledged"], false);
}

#[tokio::test]
async fn ingest_honors_client_supplied_timestamp() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/sensors",
        json!({
            "temperature": 71.5,
            "humidity": 58.0,
            "timestamp": "2026-08-01T12:00:00Z"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, readings) = get_json(&app, "/api/sensors").await;
    assert_eq!(status, StatusCode::OK);
    let stored: chrono::DateTime<chrono::Utc> = readings[0]["created_at"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let sent: chrono::DateTime<chrono::Utc> = "2026-08-01T12:00:00Z".parse().unwrap();
    assert_eq!(stored, sent);
}

#[tokio::test]
async fn reading_below_threshold_triggers_nothing() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    send_json(
        &app,
        "POST",
        "/api/thresholds",
        json!({
            "name": "temp-high",
            "metric": "temperature",
            "condition": "gt",
            "value": 85.0,
            "severity": "warning"
        }),
    )
    .await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/sensors",
        json!({ "temperature": 72.0, "humidity": 55.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["alerts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_threshold_name_conflicts() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let rule = json!({
        "name": "humidity-low",
        "metric": "humidity",
        "condition": "lt",
        "value": 40.0,
        "severity": "warning"
    });

    let (status, _) = send_json(&app, "POST", "/api/thresholds", rule.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, "POST", "/api/thresholds", rule).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn acknowledge_unknown_alert_is_not_found() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/alerts/no-such-alert/acknowledge",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_registration_rejects_unknown_event() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/webhooks",
        json!({
            "name": "bad",
            "url": "http://127.0.0.1:1/hook",
            "events": ["not_a_real_event"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing was persisted.
    let (status, listed) = get_json(&app, "/api/webhooks").await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_responses_never_expose_the_secret() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, created) = send_json(
        &app,
        "POST",
        "/api/webhooks",
        json!({
            "name": "ops",
            "url": "http://127.0.0.1:1/hook",
            "secret": "super-secret-value",
            "events": ["system_alert"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(created.get("secret").is_none());

    let id = created["id"].as_str().unwrap();
    let (_, fetched) = get_json(&app, &format!("/api/webhooks/{}", id)).await;
    assert!(!fetched.to_string().contains("super-secret-value"));

    let (_, listed) = get_json(&app, "/api/webhooks").await;
    assert!(!listed.to_string().contains("super-secret-value"));
}

#[tokio::test]
async fn preference_rejects_malformed_quiet_hours() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/preferences",
        json!({ "quiet_hours_start": "25:00", "quiet_hours_end": "06:00" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("HH:MM"));
}

#[tokio::test]
async fn unknown_route_returns_structured_404() {
    let (state, _dir) = create_test_state().await;
    let app = create_app(state);

    let (status, body) = get_json(&app, "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROUTE_NOT_FOUND");
}
