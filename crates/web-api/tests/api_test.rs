use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;
use tradepilot_core::{AppConfig, Mode, TriggeredBy};
use tradepilot_orchestrator::{bootstrap, Database, Orchestrator};
use tradepilot_web_api::ApiServer;

const KEY: &str = "secret-key";

async fn app(api_key: Option<&str>) -> (Router, Orchestrator) {
    let db = Database::in_memory().await.unwrap();
    let mut config = AppConfig::default();
    config.ai.enabled = false;
    let (_tx, rx) = watch::channel(config);
    let orchestrator = bootstrap::orchestrator(db, rx).unwrap();
    let server = ApiServer::new(orchestrator.clone(), api_key.map(str::to_string));
    (server.router(), orchestrator)
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_run(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/orchestrator/run")
        .header("X-API-Key", KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_key() {
    let (app, _) = app(None).await;
    let response = app.oneshot(get("/api/orchestrator/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_missing_server_key_fails_closed() {
    let (app, _) = app(None).await;
    let response = app
        .oneshot(get("/api/orchestrator/current", Some("anything")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(response).await["detail"], "Server Authorization Misconfigured");
}

#[tokio::test]
async fn test_missing_and_invalid_keys_are_unauthorized() {
    let (app, _) = app(Some(KEY)).await;

    let missing = app
        .clone()
        .oneshot(get("/api/orchestrator/current", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(missing).await["detail"], "Missing API Key");

    let wrong = app
        .oneshot(get("/api/orchestrator/current", Some("nope")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(wrong).await["detail"], "Invalid API Key");
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn test_run_is_accepted_and_reaches_terminal_status() {
    let (app, _) = app(Some(KEY)).await;

    let response = app.clone().oneshot(post_run(r#"{"mode": "evaluate"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json(response).await;
    assert_eq!(body["mode"], "evaluate");
    assert_eq!(body["status"], "pending");
    let job_id = body["job_id"].as_i64().unwrap();

    let mut status = Value::Null;
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/orchestrator/status/{job_id}"), Some(KEY)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        status = json(response).await["status"].clone();
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, "completed");
}

#[tokio::test]
async fn test_run_rejects_unknown_mode() {
    let (app, _) = app(Some(KEY)).await;
    let response = app.oneshot(post_run(r#"{"mode": "lunch"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("Invalid mode 'lunch'"));
}

#[tokio::test]
async fn test_run_rejects_malformed_body() {
    let (app, orchestrator) = app(Some(KEY)).await;

    for body in [r#"{"mode": 5}"#, "{not json"] {
        let response = app.clone().oneshot(post_run(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }

    let form = Request::builder()
        .method("POST")
        .uri("/api/orchestrator/run")
        .header("X-API-Key", KEY)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(r#"{"mode": "premarket"}"#))
        .unwrap();
    let response = app.oneshot(form).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("Content-Type: application/json"));

    assert!(orchestrator.jobs().history(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_without_body_defaults_to_market() {
    let (app, _) = app(Some(KEY)).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/orchestrator/run")
        .header("X-API-Key", KEY)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json(response).await["mode"], "market");
}

#[tokio::test]
async fn test_run_conflicts_with_active_job() {
    let (app, orchestrator) = app(Some(KEY)).await;
    orchestrator
        .jobs()
        .try_admit(Mode::Premarket, TriggeredBy::Scheduled)
        .await
        .unwrap();

    let response = app.clone().oneshot(post_run("{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(json(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("already in progress"));

    let current = json(
        app.oneshot(get("/api/orchestrator/current", Some(KEY)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(current["running"], true);
    assert_eq!(current["job_id"], 1);
}

#[tokio::test]
async fn test_status_unknown_job_is_not_found() {
    let (app, _) = app(Some(KEY)).await;
    let response = app
        .oneshot(get("/api/orchestrator/status/999", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_respects_limit() {
    let (app, orchestrator) = app(Some(KEY)).await;
    for reason in ["Market closed", "Market closed", "Market closed"] {
        orchestrator
            .jobs()
            .record_skipped(Mode::Market, TriggeredBy::Scheduled, reason)
            .await
            .unwrap();
    }

    let response = app
        .oneshot(get("/api/orchestrator/history?limit=2", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["status"], "skipped");
    assert_eq!(jobs[0]["triggered_by"], "scheduled");
    assert!(jobs[0].get("logs").is_none());
}
