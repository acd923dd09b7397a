// tests/api_http.rs
//
// HTTP-level tests for the control surface without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /poll/{domain} (202 + status transition, 404 unknown domain)
// - GET /scheduler/jobs, POST /scheduler/start, POST /scheduler/stop
// - POST /reports/daily

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use agworld_reporter::api::{self, AppState};
use agworld_reporter::cache::Cache;
use agworld_reporter::config::{AppConfig, SourceConfig};
use agworld_reporter::poller::Poller;
use agworld_reporter::queue::{CommandQueue, DEFAULT_CAPACITY};
use agworld_reporter::report::{PlainTextRenderer, ReportManager};
use agworld_reporter::scheduler::Scheduler;
use agworld_reporter::source::SourceClient;

const BODY_LIMIT: usize = 1024 * 1024;

/// Same wiring as the binary, but offline: the source points at a closed
/// port (so polls serve samples) and the cache is memory-only.
fn test_state(out_dir: &std::path::Path) -> AppState {
    let mut cfg = AppConfig::default();
    cfg.source = SourceConfig {
        base_url: "http://127.0.0.1:1/user_api/v1".into(),
        min_request_interval_ms: 0,
        request_timeout_secs: 2,
        ..SourceConfig::default()
    };
    cfg.report.output_dir = out_dir.to_path_buf();

    let cache = Cache::in_memory();
    let source = SourceClient::new(cfg.source.clone(), cache.clone()).expect("source client");
    let reports = ReportManager::new(out_dir).with_renderer(Arc::new(PlainTextRenderer));
    let retry = cfg.retry.clone();
    let poller = Arc::new(Poller::new(cache, Arc::new(source), Arc::new(reports), cfg));
    let scheduler = Scheduler::new();
    poller.install_jobs(&scheduler).expect("install jobs");
    let (queue, _worker) = CommandQueue::spawn(poller.clone(), retry, DEFAULT_CAPACITY);
    AppState::new(poller, scheduler, queue)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).expect("json body");
    (status, json)
}

async fn routine(app: &Router, name: &str) -> Json {
    let (_, v) = call(app, "GET", "/status").await;
    v["routines"]
        .as_array()
        .expect("routines array")
        .iter()
        .find(|r| r["name"] == name)
        .cloned()
        .expect("routine present")
}

#[tokio::test]
async fn health_reports_memory_cache_and_idle_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(test_state(dir.path()));

    let (status, v) = call(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "ok");
    assert_eq!(v["cache_backend"], "memory");
    assert_eq!(v["scheduler_running"], false);
}

#[tokio::test]
async fn manual_poll_is_accepted_and_completes_from_samples() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(test_state(dir.path()));

    let (status, v) = call(&app, "POST", "/poll/fields").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(v["job"], "poll_fields");

    let mut last = Json::Null;
    for _ in 0..100 {
        last = routine(&app, "fields").await;
        if last["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last["status"], "completed", "last seen: {last}");
    assert!(last["last_run"].is_string());
    assert!(last["error"].is_null());
}

#[tokio::test]
async fn unknown_domain_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(test_state(dir.path()));

    let (status, v) = call(&app, "POST", "/poll/tractors").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(v["error"].as_str().unwrap().contains("tractors"));
}

#[tokio::test]
async fn daily_report_trigger_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(test_state(dir.path()));

    let (status, v) = call(&app, "POST", "/reports/daily").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(v["job"], "daily_report");

    // nothing cached yet, so the run ends as no_data
    let mut last = Json::Null;
    for _ in 0..100 {
        last = routine(&app, "daily_report").await;
        if last["status"] == "no_data" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last["status"], "no_data");
}

#[tokio::test]
async fn scheduler_can_be_stopped_and_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(test_state(dir.path()));

    let (_, jobs) = call(&app, "GET", "/scheduler/jobs").await;
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 8);
    let fields = jobs.iter().find(|j| j["id"] == "poll_fields").unwrap();
    assert_eq!(fields["trigger"], "interval[60m]");

    let (status, v) = call(&app, "POST", "/scheduler/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "started");
    let (_, v) = call(&app, "POST", "/scheduler/start").await;
    assert_eq!(v["status"], "already_running");

    let (_, v) = call(&app, "POST", "/scheduler/stop").await;
    assert_eq!(v["status"], "stopped");
    let (_, jobs) = call(&app, "GET", "/scheduler/jobs").await;
    assert!(jobs.as_array().unwrap().is_empty());

    let (_, v) = call(&app, "POST", "/scheduler/start").await;
    assert_eq!(v["jobs"], 8);
    call(&app, "POST", "/scheduler/stop").await;
}
