// src/metrics.rs
use axum::{routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "poll_runs_total",
            "Per-domain poll runs by outcome (completed, no_data, error)."
        );
        describe_counter!(
            "cache_fallback_total",
            "Times the cache switched from the networked backend to memory."
        );
        describe_counter!(
            "source_fallback_total",
            "Fetches answered from built-in samples after an upstream failure."
        );
        describe_counter!("source_rate_limited_total", "HTTP 429 responses from the source API.");
        describe_counter!(
            "scheduler_coalesced_total",
            "Firings dropped because the previous run was still in flight."
        );
        describe_counter!(
            "scheduler_missed_total",
            "Firings skipped because they were later than the misfire grace."
        );
        describe_counter!("report_runs_total", "Daily report runs by outcome.");
    });
}
