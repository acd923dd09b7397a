// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod poller;
pub mod processor;
pub mod queue;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod status;

pub use crate::api::{router, AppState};
pub use crate::domain::Domain;

use shuttle_axum::axum::Router;

/// Build every service from config, start the scheduler and return the
/// control-surface router. The binary merges `/metrics` on top.
pub async fn app(cfg: config::AppConfig) -> anyhow::Result<(Router, AppState)> {
    let state = AppState::from_config(cfg).await?;
    state.scheduler.start().await;
    tracing::info!(
        cache = state.poller.cache().backend_name(),
        jobs = state.scheduler.list_jobs().len(),
        "agworld reporter ready"
    );
    Ok((router(state.clone()), state))
}
