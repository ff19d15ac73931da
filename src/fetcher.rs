// src/fetcher.rs
//! Trend fetch orchestrator.
//!
//! sanitize → orchestrator limit → cache lookup → (miss) per-source limit +
//! budget → trend source → topic cleaning → relevance filter → truncate →
//! cache store. Every path ends in a well-formed `FetchResponse`.
//!
//! Stale limiter windows and expired cache entries are swept from the fetch
//! path at most once per `SWEEP_INTERVAL_SECS`.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{fingerprint, CachedPayload, MemoryCache, ResultCache};
use crate::clock::SharedClock;
use crate::config::{select_default_sources, CatalogEntry, FetcherConfig, DEFAULT_SOURCE_COUNT};
use crate::embedding::EmbeddingProvider;
use crate::error::{ErrorCode, SkillError, SourceError};
use crate::metrics::ensure_metrics_described;
use crate::rate_limit::{Admission, RateLimitPolicy, RateLimits, Scope};
use crate::relevance::{anon_hash, PersonaContext, RelevanceFilter};
use crate::review::{LogReviewSink, ReviewEvent, ReviewKind, ReviewSink};
use crate::sanitize::{clean_topic, sanitize, sanitize_field, Sanitized};
use crate::source::TrendSource;
use crate::types::{
    FetchRequest, FetchResponse, FetchStatus, ResponseMetadata, SanitizationVerdict,
    SkillMetadata, TrendCandidate, TrendItem, TrendResult, SOURCE_LABEL,
};
use crate::validate::{check_request, parse_request, FieldIssue, ValidationError};

pub const SWEEP_INTERVAL_SECS: i64 = 60;

/// Everything the orchestrator talks to. Fields are public so callers (and
/// tests) can swap any single collaborator after `from_config`.
pub struct FetcherDeps {
    pub source: Arc<dyn TrendSource>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub cache: Arc<dyn ResultCache>,
    pub limits: Arc<RateLimits>,
    pub review: Arc<dyn ReviewSink>,
    pub clock: SharedClock,
    pub relevance: RelevanceFilter,
    pub catalog: Vec<CatalogEntry>,
    pub source_timeout: Duration,
    pub cost_per_source_call: f64,
}

impl FetcherDeps {
    pub fn from_config(
        source: Arc<dyn TrendSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        cfg: &FetcherConfig,
        clock: SharedClock,
    ) -> Self {
        let limits = RateLimits::new(
            RateLimitPolicy::new(
                cfg.limits.orchestrator_limit,
                cfg.limits.orchestrator_window_secs,
            ),
            RateLimitPolicy::new(cfg.limits.source_limit, cfg.limits.source_window_secs),
            clock.clone(),
        );
        Self {
            source,
            embedder,
            cache: Arc::new(MemoryCache::new(cfg.cache.ttl_secs, clock.clone())),
            limits: Arc::new(limits),
            review: Arc::new(LogReviewSink),
            clock,
            relevance: RelevanceFilter::new(
                cfg.relevance.threshold,
                Duration::from_millis(cfg.timeouts.embedding_ms),
            ),
            catalog: cfg.catalog.clone(),
            source_timeout: Duration::from_millis(cfg.timeouts.source_ms),
            cost_per_source_call: cfg.budget.cost_per_source_call,
        }
    }
}

/// What one invocation produced, before it is wrapped in the envelope.
#[derive(Debug, Default)]
struct Outcome {
    status: Option<FetchStatus>,
    trends: Vec<TrendItem>,
    errors: Vec<SkillError>,
    cache_hit: bool,
    source_calls: u32,
    embedding_calls: u32,
    unsafe_topics: usize,
    sources_queried: Vec<String>,
    sources_skipped: Vec<String>,
}

impl Outcome {
    fn failed(errors: Vec<SkillError>) -> Self {
        Self {
            status: Some(FetchStatus::Failed),
            errors,
            ..Default::default()
        }
    }
}

pub struct TrendFetcher {
    deps: FetcherDeps,
    /// Per-fingerprint locks coalescing concurrent misses.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl TrendFetcher {
    pub fn new(deps: FetcherDeps) -> Self {
        ensure_metrics_described();
        let now = deps.clock.now();
        Self {
            deps,
            inflight: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(now),
        }
    }

    pub fn deps(&self) -> &FetcherDeps {
        &self.deps
    }

    /// Validate raw JSON first, then fetch.
    pub async fn fetch_value(&self, raw: &Value) -> FetchResponse {
        match parse_request(raw) {
            Ok(req) => self.fetch(req).await,
            Err(e) => self.invalid_input(e),
        }
    }

    /// Drop elapsed rate windows and expired cache entries now.
    pub async fn sweep(&self) -> usize {
        let windows = self.deps.limits.prune();
        let entries = match self.deps.cache.evict_expired().await {
            Ok(n) => n,
            Err(e) => {
                counter!("fetch_cache_errors_total").increment(1);
                warn!(target: "cache", error = %e, "cache eviction failed");
                0
            }
        };
        debug!(target: "fetcher", windows, entries, "swept");
        windows + entries
    }

    async fn maybe_sweep(&self) {
        let now = self.deps.clock.now();
        {
            let mut last = self.last_sweep.lock();
            if (now - *last).num_seconds() < SWEEP_INTERVAL_SECS {
                return;
            }
            *last = now;
        }
        self.sweep().await;
    }

    pub async fn fetch(&self, req: FetchRequest) -> FetchResponse {
        let started = Instant::now();
        self.maybe_sweep().await;

        // 0) typed requests skip `parse_request`, so re-check them
        if let Err(e) = check_request(&req) {
            return self.invalid_input(e);
        }

        // 1) sanitize
        let Sanitized {
            request: req,
            verdict,
            findings,
        } = sanitize(&req);
        counter!("fetch_sanitization_total", "verdict" => verdict.as_str()).increment(1);
        if verdict.needs_review() {
            self.deps.review.submit(ReviewEvent {
                kind: ReviewKind::FlaggedInput,
                task_id: req.task_id,
                agent_id: req.context.agent_id,
                verdict,
                findings: findings.iter().map(|f| f.label()).collect(),
                content_hash: None,
                submolt: None,
                scope: None,
                key_hash: None,
                retry_after_secs: None,
                ts: self.deps.clock.now(),
            });
        }
        if verdict == SanitizationVerdict::Reject {
            warn!(
                target: "fetcher",
                task_id = %req.task_id,
                findings = findings.len(),
                "request rejected by sanitizer"
            );
            let out = Outcome::failed(vec![SkillError::from_code(ErrorCode::SanitizationFailed)]);
            return self.finish(&req, verdict, 0, started, out);
        }

        // sources are known before the window is touched
        let sources = match &req.parameters.submolts {
            Some(s) => s.clone(),
            None => select_default_sources(
                &self.deps.catalog,
                &req.parameters.persona_tags,
                DEFAULT_SOURCE_COUNT,
            ),
        };
        if sources.is_empty() {
            return self.invalid_input(ValidationError {
                task_id: req.task_id,
                issues: vec![FieldIssue {
                    field: "submolts",
                    problem: "none requested and the source catalogue is empty".into(),
                }],
            });
        }

        // 2) orchestrator limit
        let agent_key = req.context.agent_id.to_string();
        let admission = self.deps.limits.orchestrator.admit(&agent_key);
        let window_count = admission.count();
        if let Admission::Denied { retry_after, .. } = admission {
            counter!("fetch_rate_limited_total", "scope" => "orchestrator").increment(1);
            self.report_rate_limited(
                &req,
                verdict,
                Scope::Orchestrator,
                &agent_key,
                Some(retry_after.num_seconds().max(1)),
            );
            let out = Outcome::failed(vec![SkillError::new(
                ErrorCode::RateLimited,
                format!(
                    "orchestrator rate limit reached; retry in {}s",
                    retry_after.num_seconds().max(1)
                ),
            )]);
            return self.finish(&req, verdict, window_count, started, out);
        }

        // 3) cache lookup + live fetch, coalesced per fingerprint
        let fp = fingerprint(&req);
        let lock = self.inflight_lock(&fp);
        let out = {
            let _guard = lock.lock().await;
            self.lookup_or_fetch(&req, verdict, sources, &fp).await
        };
        self.release_inflight(&fp, lock);

        self.finish(&req, verdict, window_count, started, out)
    }

    fn inflight_lock(&self, fp: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .entry(fp.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_inflight(&self, fp: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.inflight.lock();
        // ours + the map's; anyone else still waiting keeps it alive
        if Arc::strong_count(&lock) <= 2 {
            map.remove(fp);
        }
    }

    async fn lookup_or_fetch(
        &self,
        req: &FetchRequest,
        verdict: SanitizationVerdict,
        sources: Vec<String>,
        fp: &str,
    ) -> Outcome {
        match self.deps.cache.get(fp).await {
            Ok(Some(entry)) => {
                counter!("fetch_cache_hits_total").increment(1);
                debug!(target: "cache", task_id = %req.task_id, "hit");
                let p = entry.payload.as_ref();
                return Outcome {
                    status: Some(p.status),
                    trends: p.trends.clone(),
                    errors: p.errors.clone(),
                    cache_hit: true,
                    sources_queried: p.sources_queried.clone(),
                    sources_skipped: p.sources_skipped.clone(),
                    ..Default::default()
                };
            }
            Ok(None) => {
                counter!("fetch_cache_misses_total").increment(1);
            }
            Err(e) => {
                counter!("fetch_cache_errors_total").increment(1);
                warn!(target: "cache", error = %e, "cache lookup failed; fetching live");
            }
        }

        let (out, cacheable) = self.fetch_live(req, verdict, sources).await;

        if cacheable {
            let payload = CachedPayload {
                status: out.status.unwrap_or(FetchStatus::Partial),
                trends: out.trends.clone(),
                errors: out.errors.clone(),
                sources_queried: out.sources_queried.clone(),
                sources_skipped: out.sources_skipped.clone(),
            };
            if let Err(e) = self.deps.cache.put(fp, payload).await {
                counter!("fetch_cache_errors_total").increment(1);
                warn!(target: "cache", error = %e, "cache store failed");
            }
        }
        out
    }

    /// Returns the outcome and whether it may be cached.
    async fn fetch_live(
        &self,
        req: &FetchRequest,
        verdict: SanitizationVerdict,
        sources: Vec<String>,
    ) -> (Outcome, bool) {
        let p = &req.parameters;
        let mut out = Outcome::default();

        // 4) budget + source limiter per source
        let cost = self.deps.cost_per_source_call;
        let mut budget = req.context.budget_remaining;
        let mut admitted = Vec::with_capacity(sources.len());
        let mut rate_denied = 0usize;
        for s in sources {
            if cost > 0.0 && budget + f64::EPSILON < cost {
                out.errors.push(SkillError::new(
                    ErrorCode::BudgetExhausted,
                    format!("{s}: remaining budget cannot cover another source call"),
                ));
                out.sources_skipped.push(s);
                continue;
            }
            let key = s.to_lowercase();
            match self.deps.limits.source.admit(&key) {
                Admission::Admitted { .. } => {
                    budget -= cost;
                    admitted.push(s);
                }
                Admission::Denied { retry_after, .. } => {
                    counter!("fetch_rate_limited_total", "scope" => "source").increment(1);
                    self.report_rate_limited(
                        req,
                        verdict,
                        Scope::Source,
                        &key,
                        Some(retry_after.num_seconds().max(1)),
                    );
                    rate_denied += 1;
                    out.errors.push(SkillError::new(
                        ErrorCode::RateLimited,
                        format!(
                            "{s}: source rate limit reached; retry in {}s",
                            retry_after.num_seconds().max(1)
                        ),
                    ));
                    out.sources_skipped.push(s);
                }
            }
        }
        if admitted.is_empty() {
            let code = if rate_denied > 0 {
                ErrorCode::RateLimited
            } else {
                ErrorCode::BudgetExhausted
            };
            debug!(target: "fetcher", task_id = %req.task_id, code = code.as_str(), "no source admitted");
            out.errors.insert(
                0,
                SkillError::new(code, "no requested source could be queried"),
            );
            out.status = Some(FetchStatus::Failed);
            return (out, false);
        }

        // 5) call sources in order
        let mut candidates: Vec<TrendCandidate> = Vec::new();
        let mut succeeded = 0usize;
        let mut dropped = 0usize;
        for s in &admitted {
            out.source_calls += 1;
            counter!("fetch_source_calls_total").increment(1);
            out.sources_queried.push(s.clone());

            let res = match tokio::time::timeout(
                self.deps.source_timeout,
                self.deps.source.fetch(s, p.time_range, p.min_engagement),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(SourceError::Timeout(self.deps.source_timeout.as_millis() as u64)),
            };

            match res {
                Ok(items) => {
                    succeeded += 1;
                    for c in items {
                        if !c.is_well_formed() {
                            dropped += 1;
                            continue;
                        }
                        match clean_topic(&c.topic) {
                            Some(topic) => candidates.push(TrendCandidate { topic, ..c }),
                            None => {
                                dropped += 1;
                                self.report_unsafe_topic(req, &c);
                                out.unsafe_topics += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    counter!("fetch_source_errors_total").increment(1);
                    warn!(target: "fetcher", submolt = %s, error = %e, "trend source call failed");
                    if matches!(e, SourceError::RateLimited) {
                        self.report_rate_limited(req, verdict, Scope::Source, &s.to_lowercase(), None);
                    }
                    out.errors.push(e.to_skill_error(s));
                }
            }
        }
        if succeeded == 0 {
            out.status = Some(FetchStatus::Failed);
            counter!("fetch_trends_dropped_total").increment(dropped as u64);
            return (out, false);
        }

        // 6) relevance
        let persona = PersonaContext::new(&p.persona_tags, req.persona_constraints());
        let mut cacheable = true;
        match self
            .deps
            .relevance
            .filter(candidates, &persona, self.deps.embedder.as_ref())
            .await
        {
            Ok(filtered) => {
                out.embedding_calls = filtered.embedding_calls;
                dropped += filtered.dropped;
                out.errors.extend(
                    filtered
                        .errors
                        .iter()
                        .map(|e| SkillError::new(ErrorCode::EmbeddingError, e.to_string())),
                );
                out.trends = filtered.items;
            }
            Err(e) => {
                warn!(target: "fetcher", task_id = %req.task_id, error = %e, "persona embedding failed");
                out.embedding_calls = 1;
                out.errors.push(SkillError::new(
                    ErrorCode::EmbeddingError,
                    format!("persona context: {e}"),
                ));
                cacheable = false;
            }
        }
        counter!("fetch_trends_dropped_total").increment(dropped as u64);

        // 7) truncate, stable
        out.trends.truncate(p.max_topics);

        out.status = Some(if out.errors.is_empty() && out.sources_skipped.is_empty() {
            FetchStatus::Success
        } else {
            FetchStatus::Partial
        });
        (out, cacheable)
    }

    fn report_unsafe_topic(&self, req: &FetchRequest, c: &TrendCandidate) {
        let (_, rules) = sanitize_field(&c.topic);
        let hard: Vec<String> = rules
            .iter()
            .filter(|r| r.is_hard())
            .map(|r| format!("topic:{}", r.as_str()))
            .collect();
        if hard.is_empty() {
            // blank topic, nothing to review
            return;
        }
        self.deps.review.submit(ReviewEvent {
            kind: ReviewKind::UnsafeTopic,
            task_id: req.task_id,
            agent_id: req.context.agent_id,
            verdict: SanitizationVerdict::Reject,
            findings: hard,
            content_hash: Some(anon_hash(&c.topic)),
            submolt: Some(c.submolt.clone()),
            scope: None,
            key_hash: None,
            retry_after_secs: None,
            ts: self.deps.clock.now(),
        });
    }

    fn report_rate_limited(
        &self,
        req: &FetchRequest,
        verdict: SanitizationVerdict,
        scope: Scope,
        key: &str,
        retry_after_secs: Option<i64>,
    ) {
        self.deps.review.submit(ReviewEvent {
            kind: ReviewKind::RateLimited,
            task_id: req.task_id,
            agent_id: req.context.agent_id,
            verdict,
            findings: vec![match retry_after_secs {
                Some(_) => format!("{}:window_exceeded", scope.as_str()),
                None => format!("{}:upstream_429", scope.as_str()),
            }],
            content_hash: None,
            submolt: (scope == Scope::Source).then(|| key.to_string()),
            scope: Some(scope),
            key_hash: Some(anon_hash(key)),
            retry_after_secs,
            ts: self.deps.clock.now(),
        });
    }

    fn finish(
        &self,
        req: &FetchRequest,
        verdict: SanitizationVerdict,
        window_count: u32,
        started: Instant,
        out: Outcome,
    ) -> FetchResponse {
        let status = out.status.unwrap_or(FetchStatus::Failed);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let requires_attention = verdict.needs_review() || out.unsafe_topics > 0;

        let confidence = if out.trends.is_empty() {
            0.0
        } else {
            out.trends.iter().map(|t| t.relevance_score).sum::<f32>() / out.trends.len() as f32
        };
        let cost = (out.source_calls as f64 * self.deps.cost_per_source_call)
            .min(req.context.budget_remaining)
            .max(0.0);

        counter!("fetch_requests_total", "status" => status.as_str()).increment(1);
        histogram!("fetch_processing_ms").record(elapsed_ms as f64);
        info!(
            target: "fetcher",
            task_id = %req.task_id,
            status = status.as_str(),
            cache_hit = out.cache_hit,
            source_calls = out.source_calls,
            trends = out.trends.len(),
            errors = out.errors.len(),
            ms = elapsed_ms,
            "fetch done"
        );

        let metadata = ResponseMetadata {
            fetched_at: self.deps.clock.now(),
            source: SOURCE_LABEL.to_string(),
            cache_hit: out.cache_hit,
            cache_ttl_seconds: self.deps.cache.ttl_secs(),
            processing_time_ms: elapsed_ms,
            moltbook_api_calls: out.source_calls,
            embedding_calls: out.embedding_calls,
            orchestrator_rate_window_requests: window_count,
            sanitization_status: verdict,
            requires_judge_attention: requires_attention,
            persona_tags_used: req.parameters.persona_tags.clone(),
            sources_queried: out.sources_queried,
            sources_skipped: out.sources_skipped,
        };

        FetchResponse {
            task_id: req.task_id,
            status,
            result: Some(TrendResult {
                trends: out.trends,
                metadata,
            }),
            metadata: SkillMetadata {
                execution_time_ms: elapsed_ms,
                cost_incurred: cost,
                confidence_score: confidence.clamp(0.0, 1.0),
                requires_validation: requires_attention,
            },
            errors: out.errors,
        }
    }

    fn invalid_input(&self, e: ValidationError) -> FetchResponse {
        counter!("fetch_requests_total", "status" => FetchStatus::Failed.as_str()).increment(1);
        debug!(target: "fetcher", task_id = %e.task_id, issues = e.issues.len(), "invalid input");
        FetchResponse {
            task_id: e.task_id,
            status: FetchStatus::Failed,
            result: None,
            metadata: SkillMetadata::default(),
            errors: vec![e.to_skill_error()],
        }
    }
}
