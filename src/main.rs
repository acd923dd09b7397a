//! Agworld Reporter: binary entrypoint.
//! Loads config, wires the cache, source client, poller and scheduler, and
//! serves the control surface plus `/metrics`.

use agworld_reporter::config::AppConfig;
use agworld_reporter::metrics::Metrics;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// JSON logs when `LOG_FORMAT=json`, compact text otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agworld_reporter=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    // the runtime may already have installed a subscriber
    if let Err(e) = res {
        eprintln!("tracing subscriber not installed: {e}");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().map_err(anyhow::Error::from)?;
    let metrics = Metrics::init()?;
    let (router, _state) = agworld_reporter::app(cfg).await?;

    Ok(router.merge(metrics.router()).into())
}
