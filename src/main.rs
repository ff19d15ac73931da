//! Trend fetcher — binary entrypoint.
//! Boots the Axum HTTP server: config → adapters → fetcher → routes.

use shuttle_axum::ShuttleAxum;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trend_fetcher::clock::SystemClock;
use trend_fetcher::config::FetcherConfig;
use trend_fetcher::metrics::Metrics;
use trend_fetcher::{build_fetcher, router, AppState};

/// Compact logs by default, JSON when LOG_FORMAT=json.
/// Shuttle may already have installed a subscriber; that is fine.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_fetcher=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = FetcherConfig::load_default()?;
    let fetcher = build_fetcher(&cfg, Arc::new(SystemClock))?;

    tracing::info!(
        orchestrator_limit = cfg.limits.orchestrator_limit,
        source_window_secs = cfg.limits.source_window_secs,
        cache_ttl_secs = cfg.cache.ttl_secs,
        threshold = cfg.relevance.threshold,
        "trend fetcher ready"
    );

    let state = AppState {
        fetcher: Arc::new(fetcher),
    };
    let mut app = router(state);

    if std::env::var("METRICS_ENABLED").map(|v| v != "0").unwrap_or(true) {
        let metrics = Metrics::init(cfg.cache.ttl_secs)?;
        app = app.merge(metrics.router());
    }

    Ok(app.into())
}
