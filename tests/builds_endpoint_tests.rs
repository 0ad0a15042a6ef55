//! Build and configuration endpoint integration tests
//!
//! Covers:
//! - GET /api/health
//! - POST /api/builds with started / queued / rejected outcomes
//! - GET /api/builds, /api/builds/{id}, /progress and /log
//! - GET /api/configs and DELETE /api/configs/{id}

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

mod common;
use common::{build_app_state, create_test_config, create_test_db, wait_for_status, wait_until_idle};

use cicd_server::endpoints::create_router;
use cicd_server::models::build::BuildStatus;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, value)
}

#[tokio::test]
async fn test_health_check_returns_ok() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, body) = send(&app, "GET", "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn test_trigger_start_queue_and_reject() {
    let db = create_test_db().await;
    let state = build_app_state(db.clone());
    let scheduler = state.scheduler.clone();
    let app = create_router(state);
    let config = create_test_config(&db, "web", "", &["sleep 0.3"], 1).await;

    let trigger = json!({"configuration_id": config.id, "payload": {"ref": "main"}});

    let (status, started) = send(&app, "POST", "/api/builds", Some(trigger.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["outcome"], "started");

    let (status, queued) = send(&app, "POST", "/api/builds", Some(trigger.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queued["outcome"], "queued");
    assert_eq!(queued["queue_position"], 1);

    let (status, rejected) = send(&app, "POST", "/api/builds", Some(trigger)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected["outcome"], "rejected");
    assert_eq!(
        rejected["message"],
        "Queue for configuration 'web' is full (max 1 queued builds)"
    );
    assert!(rejected.get("build_id").is_none());

    wait_until_idle(&db, &scheduler).await;
}

#[tokio::test]
async fn test_trigger_unknown_configuration_returns_404() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, body) = send(
        &app,
        "POST",
        "/api/builds",
        Some(json!({"configuration_id": 4242})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().is_some());
}

#[tokio::test]
async fn test_build_record_progress_and_log() {
    let db = create_test_db().await;
    let state = build_app_state(db.clone());
    let app = create_router(state);
    let config = create_test_config(&db, "web", "", &["echo built"], 5).await;

    let (_, started) = send(
        &app,
        "POST",
        "/api/builds",
        Some(json!({"configuration_id": config.id, "branch": "release"})),
    )
    .await;
    let id = started["build_id"].as_i64().unwrap();
    wait_for_status(&db, id, BuildStatus::Success).await;

    let (status, record) = send(&app, "GET", &format!("/api/builds/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], id);
    assert_eq!(record["status"], "success");
    assert_eq!(record["branch"], "release");

    let (status, progress) =
        send(&app, "GET", &format!("/api/builds/{}/progress", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["build_id"], id);
    assert_eq!(progress["percent"], 100);
    assert_eq!(progress["overdue"], false);
    assert!(progress.get("estimated_remaining_seconds").is_none());

    let (status, log) = send(&app, "GET", &format!("/api/builds/{}/log", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["current_step"], 1);
    assert_eq!(log["total_steps"], 1);
    assert!(log["log"].as_str().unwrap().contains("Executing: echo built\nbuilt\n"));

    let (status, list) = send(&app, "GET", "/api/builds?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_build_returns_404() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, _) = send(&app, "GET", "/api/builds/77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/builds/77/progress", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_configs_hides_api_token() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db.clone()));
    create_test_config(&db, "web", "/srv/web", &["make"], 3).await;

    let (status, body) = send(&app, "GET", "/api/configs", None).await;

    assert_eq!(status, StatusCode::OK);
    let configs = body.as_array().unwrap();
    assert_eq!(configs.len(), 2);
    assert!(configs.iter().all(|c| c.get("api_token").is_none()));
}

#[tokio::test]
async fn test_delete_config_endpoint() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db.clone()));
    let config = create_test_config(&db, "web", "", &["make"], 3).await;

    let (status, body) = send(&app, "DELETE", &format!("/api/configs/{}", config.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], config.id);
    assert_eq!(body["reassigned_builds"], 0);

    // Only the seeded default remains and it cannot be removed
    let (_, configs) = send(&app, "GET", "/api/configs", None).await;
    let remaining = configs[0]["id"].as_i64().unwrap();
    let (status, body) = send(&app, "DELETE", &format!("/api/configs/{}", remaining), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("last remaining"));
}
