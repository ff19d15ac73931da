// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_requests_total", "Fetch calls by final status.");
        describe_counter!("fetch_cache_hits_total", "Fetches served from the result cache.");
        describe_counter!("fetch_cache_misses_total", "Fetches that had to go to the source.");
        describe_counter!(
            "fetch_cache_errors_total",
            "Cache backend errors (treated as miss / skipped store)."
        );
        describe_counter!("fetch_rate_limited_total", "Denied admissions by limiter scope.");
        describe_counter!("fetch_sanitization_total", "Sanitizer verdicts on incoming requests.");
        describe_counter!("fetch_source_calls_total", "Trend source calls made.");
        describe_counter!("fetch_source_errors_total", "Trend source calls that failed.");
        describe_counter!(
            "fetch_trends_dropped_total",
            "Candidates dropped (malformed, unsafe topic or below relevance threshold)."
        );
        describe_histogram!("fetch_processing_ms", "End-to-end fetch time in milliseconds.");
        describe_gauge!("fetch_cache_ttl_seconds", "Configured absolute cache TTL.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and expose a static gauge for the cache TTL.
    pub fn init(ttl_secs: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        ensure_metrics_described();
        // absolute TTL, no sliding refresh
        gauge!("fetch_cache_ttl_seconds").set(ttl_secs as f64);

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
