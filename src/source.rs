// src/source.rs
//! Trend source abstraction + concrete providers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::SourceError;
use crate::types::{TimeRange, TrendCandidate};

#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn fetch(
        &self,
        submolt: &str,
        time_range: TimeRange,
        min_engagement: u32,
    ) -> Result<Vec<TrendCandidate>, SourceError>;

    fn name(&self) -> &'static str;
}

/* ----------------------------
MoltBook HTTP client
---------------------------- */

#[derive(Debug, Deserialize)]
struct TrendsResp {
    #[serde(default)]
    trends: Vec<WireTrend>,
}

#[derive(Debug, Deserialize)]
struct WireTrend {
    topic: String,
    #[serde(default)]
    submolt: Option<String>,
    engagement_score: f64,
    #[serde(default)]
    post_count: u64,
    #[serde(default)]
    comment_count: u64,
    #[serde(default)]
    trend_velocity: f64,
    timestamp: DateTime<Utc>,
}

/// Talks to the MoltBook trends endpoint:
/// `GET {base}/submolts/{name}/trends?time_range=4h&min_engagement=50`.
pub struct MoltbookClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl MoltbookClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("trend-fetcher/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn trends_url(&self, submolt: &str) -> String {
        // "r/AgentTech" -> ".../submolts/AgentTech/trends"
        let name = submolt.strip_prefix("r/").unwrap_or(submolt);
        format!("{}/submolts/{}/trends", self.base_url, name)
    }
}

#[async_trait]
impl TrendSource for MoltbookClient {
    async fn fetch(
        &self,
        submolt: &str,
        time_range: TimeRange,
        min_engagement: u32,
    ) -> Result<Vec<TrendCandidate>, SourceError> {
        let mut req = self.http.get(self.trends_url(submolt)).query(&[
            ("time_range", time_range.as_str().to_string()),
            ("min_engagement", min_engagement.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!("status {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }
        if !status.is_success() {
            return Err(SourceError::Network(format!("status {status}")));
        }

        let body: TrendsResp = resp.json().await?;
        Ok(body
            .trends
            .into_iter()
            .map(|t| TrendCandidate {
                topic: t.topic,
                submolt: t.submolt.unwrap_or_else(|| submolt.to_string()),
                engagement_score: t.engagement_score,
                post_count: t.post_count,
                comment_count: t.comment_count,
                trend_velocity: t.trend_velocity,
                timestamp: t.timestamp,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "moltbook"
    }
}

/* ----------------------------
Static source (fixtures / offline runs)
---------------------------- */

/// Serves canned candidates per submolt. Unknown submolts yield an empty list.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    by_submolt: HashMap<String, Vec<TrendCandidate>>,
}

impl StaticSource {
    pub fn new(candidates: Vec<TrendCandidate>) -> Self {
        let mut by_submolt: HashMap<String, Vec<TrendCandidate>> = HashMap::new();
        for c in candidates {
            by_submolt
                .entry(c.submolt.to_lowercase())
                .or_default()
                .push(c);
        }
        Self { by_submolt }
    }

    /// JSON array of candidates.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let v: Vec<TrendCandidate> = serde_json::from_str(s)?;
        Ok(Self::new(v))
    }
}

#[async_trait]
impl TrendSource for StaticSource {
    async fn fetch(
        &self,
        submolt: &str,
        _time_range: TimeRange,
        _min_engagement: u32,
    ) -> Result<Vec<TrendCandidate>, SourceError> {
        Ok(self
            .by_submolt
            .get(&submolt.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
