// src/relevance.rs
//! Relevance gate: cosine similarity between each trend topic and the
//! persona context, with a hard floor on the score.

use std::time::Duration;
use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::types::{TrendCandidate, TrendItem};

/// Floor for every returned trend. Config may raise it, never lower it.
pub const RELEVANCE_THRESHOLD: f32 = 0.75;
pub const ENV_RELEVANCE_THRESHOLD: &str = "TREND_FETCHER_RELEVANCE_THRESHOLD";

// Dev logging gate: RELEVANCE_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("RELEVANCE_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Short stable id for free text, so logs never carry the text itself.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn dev_log_relevance(event: &str, topic: &str, submolt: &str, score: f32, threshold: f32) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(topic);
    // Never log raw text. Only hashed id.
    info!(target: "relevance", %id, %score, %threshold, submolt, event);
}

/// Clamp a configured threshold into `[RELEVANCE_THRESHOLD, 1.0]`.
/// Non-finite input falls back to the floor.
pub fn clamp_threshold(raw: f32) -> f32 {
    if !raw.is_finite() {
        return RELEVANCE_THRESHOLD;
    }
    raw.clamp(RELEVANCE_THRESHOLD, 1.0)
}

/// Cosine similarity clamped to [0,1]. Mismatched lengths or zero vectors
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0f32;
    let mut na = 0f32;
    let mut nb = 0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let sim = dot / (na.sqrt() * nb.sqrt());
    if sim.is_finite() {
        sim.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Text the topics are compared against: persona tags then constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonaContext {
    text: String,
}

impl PersonaContext {
    pub fn new(tags: &[String], constraints: &[String]) -> Self {
        let text = tags
            .iter()
            .chain(constraints)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Survivors, in source order.
    pub items: Vec<TrendItem>,
    /// Scored below the threshold.
    pub dropped: usize,
    /// Candidates whose own embedding failed.
    pub errors: Vec<EmbeddingError>,
    pub embedding_calls: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RelevanceFilter {
    threshold: f32,
    embed_timeout: Duration,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::new(RELEVANCE_THRESHOLD, Duration::from_secs(5))
    }
}

impl RelevanceFilter {
    pub fn new(threshold: f32, embed_timeout: Duration) -> Self {
        Self {
            threshold: clamp_threshold(threshold),
            embed_timeout,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    async fn embed(
        &self,
        embedder: &dyn EmbeddingProvider,
        text: &str,
    ) -> Result<Vec<f32>, EmbeddingError> {
        match tokio::time::timeout(self.embed_timeout, embedder.embed(text)).await {
            Ok(res) => res,
            Err(_) => Err(EmbeddingError::Timeout(self.embed_timeout.as_millis() as u64)),
        }
    }

    /// Score every candidate against `persona` and keep those at or above
    /// the threshold. Fails as a whole only when the persona context itself
    /// cannot be embedded.
    pub async fn filter(
        &self,
        candidates: Vec<TrendCandidate>,
        persona: &PersonaContext,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<FilterOutcome, EmbeddingError> {
        let mut out = FilterOutcome::default();
        if candidates.is_empty() {
            return Ok(out);
        }

        let persona_vec = if persona.is_empty() {
            None
        } else {
            out.embedding_calls += 1;
            Some(self.embed(embedder, persona.text()).await?)
        };

        for c in candidates {
            out.embedding_calls += 1;
            let emb = match self.embed(embedder, &c.topic).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        target: "relevance",
                        id = %anon_hash(&c.topic),
                        error = %e,
                        "topic embedding failed; dropping candidate"
                    );
                    out.errors.push(e);
                    continue;
                }
            };

            let score = match &persona_vec {
                Some(p) => cosine_similarity(p, &emb),
                None => 1.0,
            };

            if score >= self.threshold {
                dev_log_relevance("pass", &c.topic, &c.submolt, score, self.threshold);
                out.items.push(TrendItem::from_candidate(c, score, emb));
            } else {
                dev_log_relevance("drop", &c.topic, &c.submolt, score, self.threshold);
                out.dropped += 1;
            }
        }

        Ok(out)
    }
}
