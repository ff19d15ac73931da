// src/lib.rs
// Public library surface for the binary, integration tests and demos.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod rate_limit;
pub mod relevance;
pub mod review;
pub mod sanitize;
pub mod source;
pub mod types;
pub mod validate;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::error::{ErrorCode, SkillError};
pub use crate::fetcher::{FetcherDeps, TrendFetcher};
pub use crate::types::{FetchRequest, FetchResponse, FetchStatus, SanitizationVerdict};

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::{EmbeddingBackend, FetcherConfig};
use crate::embedding::{EmbeddingProvider, HashingEmbeddings, OllamaEmbeddings};
use crate::review::{LogReviewSink, ReviewSink, WebhookReviewSink};
use crate::source::{MoltbookClient, StaticSource, TrendSource};

/// Wire the concrete adapters named by the config into a fetcher.
pub fn build_fetcher(cfg: &FetcherConfig, clock: SharedClock) -> anyhow::Result<TrendFetcher> {
    use anyhow::Context;
    use std::time::Duration;

    let source: Arc<dyn TrendSource> = match &cfg.moltbook.fixture_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading trend fixture {path}"))?;
            Arc::new(StaticSource::from_json_str(&raw).context("parsing trend fixture")?)
        }
        None => Arc::new(MoltbookClient::new(
            &cfg.moltbook.base_url,
            std::env::var(&cfg.moltbook.api_key_env).ok(),
            Duration::from_millis(cfg.timeouts.source_ms),
        )?),
    };

    let embedder: Arc<dyn EmbeddingProvider> = match cfg.embedding.provider {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbeddings::new(cfg.embedding.dimension)),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbeddings::new(
            &cfg.embedding.url,
            &cfg.embedding.model,
            Duration::from_millis(cfg.timeouts.embedding_ms),
        )?),
    };

    let mut deps = FetcherDeps::from_config(source, embedder, cfg, clock);
    let review: Arc<dyn ReviewSink> = match &cfg.review.webhook_url {
        Some(url) => Arc::new(WebhookReviewSink::new(url.clone())),
        None => Arc::new(LogReviewSink),
    };
    deps.review = review;

    Ok(TrendFetcher::new(deps))
}
