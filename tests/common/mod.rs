// tests/common/mod.rs
//
// In-memory fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use trend_fetcher::cache::{CacheEntry, CachedPayload, ResultCache};
use trend_fetcher::clock::ManualClock;
use trend_fetcher::config::FetcherConfig;
use trend_fetcher::embedding::EmbeddingProvider;
use trend_fetcher::error::{CacheError, EmbeddingError, SourceError};
use trend_fetcher::review::{ReviewEvent, ReviewSink};
use trend_fetcher::source::TrendSource;
use trend_fetcher::types::{
    FetchContext, FetchParameters, FetchRequest, TimeRange, TrendCandidate,
};
use trend_fetcher::{FetcherDeps, TrendFetcher};

pub const AGENT_TECH: &str = "r/AgentTech";
pub const AI_COLLAB: &str = "r/AICollaboration";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
}

pub fn candidate(topic: &str, submolt: &str) -> TrendCandidate {
    TrendCandidate {
        topic: topic.to_string(),
        submolt: submolt.to_string(),
        engagement_score: 0.6,
        post_count: 12,
        comment_count: 48,
        trend_velocity: 1.4,
        timestamp: t0(),
    }
}

/* ----------------------------
Trend source
---------------------------- */

#[derive(Debug, Clone)]
pub enum Reply {
    Trends(Vec<TrendCandidate>),
    Auth,
    Network,
    /// Upstream 429.
    Throttled,
    /// Sleeps far past any sane timeout.
    Hang,
}

#[derive(Default)]
pub struct CountingSource {
    replies: HashMap<String, Reply>,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, submolt: &str, reply: Reply) -> Self {
        self.replies.insert(submolt.to_lowercase(), reply);
        self
    }

    /// r/AgentTech: five candidates, three relevant.
    /// r/AICollaboration: two candidates, one relevant.
    pub fn standard() -> Self {
        Self::new()
            .with(
                AGENT_TECH,
                Reply::Trends(vec![
                    candidate("Agent payments rails", AGENT_TECH),
                    candidate("Weekend meme dump", AGENT_TECH),
                    candidate("Tool-use benchmarks", AGENT_TECH),
                    candidate("Celebrity gossip", AGENT_TECH),
                    candidate("Multi-agent protocols", AGENT_TECH),
                ]),
            )
            .with(
                AI_COLLAB,
                Reply::Trends(vec![
                    candidate("Pairing agents with humans", AI_COLLAB),
                    candidate("Office snacks", AI_COLLAB),
                ]),
            )
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TrendSource for CountingSource {
    async fn fetch(
        &self,
        submolt: &str,
        _time_range: TimeRange,
        _min_engagement: u32,
    ) -> Result<Vec<TrendCandidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(submolt.to_string());
        match self.replies.get(&submolt.to_lowercase()).cloned() {
            None => Ok(Vec::new()),
            Some(Reply::Trends(v)) => Ok(v),
            Some(Reply::Auth) => Err(SourceError::Auth("status 401".into())),
            Some(Reply::Network) => Err(SourceError::Network("connection reset".into())),
            Some(Reply::Throttled) => Err(SourceError::RateLimited),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(Vec::new())
            }
        }
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/* ----------------------------
Embeddings
---------------------------- */

/// Known topics embed to `[s, sqrt(1-s^2)]`, so their cosine with the
/// persona vector `[1, 0]` is `s`. Any other text is treated as persona
/// context. Text containing "explode" fails.
pub struct ScoreEmbedder {
    scores: HashMap<String, f32>,
    calls: AtomicU32,
}

impl ScoreEmbedder {
    pub fn standard() -> Self {
        let scores = [
            ("Agent payments rails", 0.92),
            ("Weekend meme dump", 0.20),
            ("Tool-use benchmarks", 0.81),
            ("Celebrity gossip", 0.50),
            ("Multi-agent protocols", 0.78),
            ("Pairing agents with humans", 0.88),
            ("Office snacks", 0.10),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            scores,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScoreEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("explode") {
            return Err(EmbeddingError::Request("status 500".into()));
        }
        Ok(match self.scores.get(text) {
            Some(s) => vec![*s, (1.0 - s * s).max(0.0).sqrt()],
            None => vec![1.0, 0.0],
        })
    }

    fn name(&self) -> &'static str {
        "score"
    }
}

/* ----------------------------
Review sink + cache
---------------------------- */

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ReviewEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ReviewEvent> {
        self.events.lock().clone()
    }
}

impl ReviewSink for RecordingSink {
    fn submit(&self, event: ReviewEvent) {
        self.events.lock().push(event);
    }
}

pub struct FailingCache;

#[async_trait]
impl ResultCache for FailingCache {
    async fn get(&self, _fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn put(&self, _fingerprint: &str, _payload: CachedPayload) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    fn ttl_secs(&self) -> u64 {
        3600
    }
}

/* ----------------------------
Harness
---------------------------- */

pub struct Harness {
    pub fetcher: Arc<TrendFetcher>,
    pub source: Arc<CountingSource>,
    pub embedder: Arc<ScoreEmbedder>,
    pub sink: Arc<RecordingSink>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(source: CountingSource) -> Self {
        Self::build(source, FetcherConfig::default(), |_| {})
    }

    pub fn with_config(source: CountingSource, cfg: FetcherConfig) -> Self {
        Self::build(source, cfg, |_| {})
    }

    pub fn build(
        source: CountingSource,
        cfg: FetcherConfig,
        tweak: impl FnOnce(&mut FetcherDeps),
    ) -> Self {
        let clock = ManualClock::new(t0());
        let source = Arc::new(source);
        let embedder = Arc::new(ScoreEmbedder::standard());
        let sink = Arc::new(RecordingSink::default());

        let mut deps = FetcherDeps::from_config(
            source.clone(),
            embedder.clone(),
            &cfg,
            Arc::new(clock.clone()),
        );
        deps.review = sink.clone();
        tweak(&mut deps);

        Self {
            fetcher: Arc::new(TrendFetcher::new(deps)),
            source,
            embedder,
            sink,
            clock,
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

/* ----------------------------
Requests
---------------------------- */

pub fn agent() -> Uuid {
    Uuid::parse_str("660e8400-e29b-41d4-a716-446655440001").unwrap()
}

pub fn request(submolts: &[&str], tags: &[&str]) -> FetchRequest {
    request_for(agent(), submolts, tags)
}

pub fn request_for(agent_id: Uuid, submolts: &[&str], tags: &[&str]) -> FetchRequest {
    FetchRequest {
        task_id: Uuid::new_v4(),
        parameters: FetchParameters {
            submolts: if submolts.is_empty() {
                None
            } else {
                Some(submolts.iter().map(|s| s.to_string()).collect())
            },
            persona_tags: tags.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
        context: FetchContext {
            agent_id,
            campaign_id: None,
            budget_remaining: 45.25,
            persona_constraints: None,
        },
    }
}

/// Contract-shaped raw request.
pub fn raw_request() -> Value {
    json!({
        "task_id": "550e8400-e29b-41d4-a716-446655440000",
        "parameters": {
            "submolts": [AGENT_TECH],
            "time_range": "4h",
            "min_engagement": 50,
            "persona_tags": ["tech", "genz"],
            "max_topics": 10
        },
        "context": {
            "agent_id": "660e8400-e29b-41d4-a716-446655440001",
            "campaign_id": "770e8400-e29b-41d4-a716-446655440002",
            "budget_remaining": 45.25
        }
    })
}
