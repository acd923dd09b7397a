// src/api.rs
//! Control surface: health, status overview, scheduler start/stop and manual
//! triggers. Triggers only enqueue; outcomes show up under `/status`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::domain::Domain;
use crate::notify::EmailDeliverer;
use crate::poller::{NamedStatus, Poller};
use crate::queue::{Command, CommandQueue, QueueError, DEFAULT_CAPACITY};
use crate::report::{HtmlRenderer, ReportManager};
use crate::scheduler::{JobInfo, Scheduler};
use crate::source::SourceClient;

#[derive(Clone)]
pub struct AppState {
    pub poller: Arc<Poller>,
    pub scheduler: Scheduler,
    pub queue: CommandQueue,
}

impl AppState {
    pub fn new(poller: Arc<Poller>, scheduler: Scheduler, queue: CommandQueue) -> Self {
        Self {
            poller,
            scheduler,
            queue,
        }
    }

    /// Construct every service once from config. Jobs are installed but the
    /// scheduler is not started.
    pub async fn from_config(cfg: AppConfig) -> anyhow::Result<Self> {
        let cache = Cache::connect(
            &cfg.cache.redis_url,
            Duration::from_secs(cfg.cache.connect_timeout_secs),
        )
        .await;
        let source = SourceClient::new(cfg.source.clone(), cache.clone())?;
        if !source.test_connection().await {
            tracing::warn!(target: "source", "agworld connection check failed, polls may serve sample data");
        }
        let deliverer = EmailDeliverer::from_config(&cfg.email)?;
        let reports = ReportManager::new(cfg.report.output_dir.clone())
            .with_renderer(Arc::new(HtmlRenderer))
            .with_deliverer(Arc::new(deliverer));

        let retry = cfg.retry.clone();
        let poller = Arc::new(Poller::new(cache, Arc::new(source), Arc::new(reports), cfg));
        let scheduler = Scheduler::new();
        poller.install_jobs(&scheduler)?;
        let (queue, _worker) = CommandQueue::spawn(poller.clone(), retry, DEFAULT_CAPACITY);

        Ok(Self::new(poller, scheduler, queue))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/scheduler/jobs", get(list_jobs))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/poll/{domain}", post(trigger_poll))
        .route("/reports/daily", post(trigger_daily_report))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthOut {
    status: &'static str,
    cache_backend: &'static str,
    scheduler_running: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    let cache = state.poller.cache();
    cache.ping().await;
    Json(HealthOut {
        status: "ok",
        cache_backend: cache.backend_name(),
        scheduler_running: state.scheduler.is_running(),
    })
}

#[derive(Serialize)]
struct StatusOut {
    scheduler_running: bool,
    cache_backend: &'static str,
    routines: Vec<NamedStatus>,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    Json(StatusOut {
        scheduler_running: state.scheduler.is_running(),
        cache_backend: state.poller.cache().backend_name(),
        routines: state.poller.all_statuses().await,
    })
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobInfo>> {
    Json(state.scheduler.list_jobs())
}

async fn start_scheduler(State(state): State<AppState>) -> Response {
    if state.scheduler.is_running() {
        return Json(json!({ "status": "already_running" })).into_response();
    }
    // shutdown drops the job table, so a restart re-installs it
    if let Err(e) = state.poller.install_jobs(&state.scheduler) {
        tracing::error!(target: "scheduler", error = %e, "installing jobs failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response();
    }
    state.scheduler.start().await;
    Json(json!({ "status": "started", "jobs": state.scheduler.list_jobs().len() })).into_response()
}

async fn stop_scheduler(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.shutdown().await;
    Json(json!({ "status": "stopped" }))
}

async fn trigger_poll(State(state): State<AppState>, Path(domain): Path<String>) -> Response {
    let d = Domain::parse(&domain);
    if d == Domain::Unknown {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown domain '{domain}'") })),
        )
            .into_response();
    }
    enqueue(&state.queue, Command::PollDomain(d))
}

async fn trigger_daily_report(State(state): State<AppState>) -> Response {
    enqueue(&state.queue, Command::DailyReport)
}

fn enqueue(queue: &CommandQueue, cmd: Command) -> Response {
    match queue.submit(cmd) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "job": cmd.job_id() })),
        )
            .into_response(),
        Err(e @ QueueError::Full) | Err(e @ QueueError::Closed) => {
            tracing::warn!(target: "poller", job = %cmd.job_id(), error = %e, "command rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
