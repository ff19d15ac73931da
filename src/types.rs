// src/types.rs
//! Typed request/response contract of the trend fetcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, SkillError};

/// Value of `metadata.source` on every response.
pub const SOURCE_LABEL: &str = "moltbook";

pub const MAX_SUBMOLTS: usize = 10;
pub const MIN_TOPICS: usize = 1;
pub const MAX_TOPICS: usize = 50;
pub const DEFAULT_MAX_TOPICS: usize = 10;
pub const DEFAULT_MIN_ENGAGEMENT: u32 = 50;
/// Topics handed back to callers never exceed this many characters.
pub const MAX_TOPIC_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1h",
            TimeRange::FourHours => "4h",
            TimeRange::OneDay => "24h",
            TimeRange::SevenDays => "7d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1h" => Some(TimeRange::OneHour),
            "4h" => Some(TimeRange::FourHours),
            "24h" => Some(TimeRange::OneDay),
            "7d" => Some(TimeRange::SevenDays),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchParameters {
    /// `None` means "pick the most relevant catalogue sources".
    pub submolts: Option<Vec<String>>,
    pub time_range: TimeRange,
    pub min_engagement: u32,
    pub persona_tags: Vec<String>,
    pub max_topics: usize,
}

impl Default for FetchParameters {
    fn default() -> Self {
        Self {
            submolts: None,
            time_range: TimeRange::default(),
            min_engagement: DEFAULT_MIN_ENGAGEMENT,
            persona_tags: Vec::new(),
            max_topics: DEFAULT_MAX_TOPICS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchContext {
    pub agent_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub budget_remaining: f64,
    pub persona_constraints: Option<Vec<String>>,
}

/// A validated request. Build it through `validate::parse_request` at the
/// boundary; everything downstream trusts its invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub task_id: Uuid,
    pub parameters: FetchParameters,
    pub context: FetchContext,
}

impl FetchRequest {
    pub fn persona_constraints(&self) -> &[String] {
        self.context.persona_constraints.as_deref().unwrap_or_default()
    }
}

/// Raw item returned by the trend source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendCandidate {
    pub topic: String,
    pub submolt: String,
    pub engagement_score: f64,
    pub post_count: u64,
    pub comment_count: u64,
    pub trend_velocity: f64,
    pub timestamp: DateTime<Utc>,
}

impl TrendCandidate {
    /// Engagement in [0,1] and a finite, non-negative velocity.
    pub fn is_well_formed(&self) -> bool {
        self.engagement_score.is_finite()
            && (0.0..=1.0).contains(&self.engagement_score)
            && self.trend_velocity.is_finite()
            && self.trend_velocity >= 0.0
    }
}

/// A candidate that survived relevance filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    pub topic: String,
    pub submolt: String,
    pub engagement_score: f64,
    pub post_count: u64,
    pub comment_count: u64,
    pub trend_velocity: f64,
    pub timestamp: DateTime<Utc>,
    pub relevance_score: f32,
    pub topic_embedding: Vec<f32>,
}

impl TrendItem {
    pub fn from_candidate(c: TrendCandidate, relevance_score: f32, embedding: Vec<f32>) -> Self {
        Self {
            topic: c.topic,
            submolt: c.submolt,
            engagement_score: c.engagement_score,
            post_count: c.post_count,
            comment_count: c.comment_count,
            trend_velocity: c.trend_velocity,
            timestamp: c.timestamp,
            relevance_score,
            topic_embedding: embedding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Partial,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Partial => "partial",
            FetchStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SanitizationVerdict {
    #[default]
    Ok,
    Suspect,
    Reject,
}

impl SanitizationVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanitizationVerdict::Ok => "OK",
            SanitizationVerdict::Suspect => "SUSPECT",
            SanitizationVerdict::Reject => "REJECT",
        }
    }

    pub fn needs_review(&self) -> bool {
        !matches!(self, SanitizationVerdict::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    pub cache_hit: bool,
    pub cache_ttl_seconds: u64,
    pub processing_time_ms: u64,
    /// Trend source calls made by this invocation.
    pub moltbook_api_calls: u32,
    pub embedding_calls: u32,
    /// Requests counted in the agent's current orchestrator window.
    pub orchestrator_rate_window_requests: u32,
    pub sanitization_status: SanitizationVerdict,
    pub requires_judge_attention: bool,
    pub persona_tags_used: Vec<String>,
    pub sources_queried: Vec<String>,
    pub sources_skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub trends: Vec<TrendItem>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub execution_time_ms: u64,
    pub cost_incurred: f64,
    pub confidence_score: f32,
    pub requires_validation: bool,
}

impl Default for SkillMetadata {
    fn default() -> Self {
        Self {
            execution_time_ms: 0,
            cost_incurred: 0.0,
            confidence_score: 0.0,
            requires_validation: false,
        }
    }
}

/// Response envelope. Always well-formed, whatever happened inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub task_id: Uuid,
    pub status: FetchStatus,
    pub result: Option<TrendResult>,
    pub metadata: SkillMetadata,
    pub errors: Vec<SkillError>,
}

impl FetchResponse {
    pub fn trends(&self) -> &[TrendItem] {
        self.result
            .as_ref()
            .map(|r| r.trends.as_slice())
            .unwrap_or_default()
    }

    pub fn response_metadata(&self) -> Option<&ResponseMetadata> {
        self.result.as_ref().map(|r| &r.metadata)
    }

    pub fn cache_hit(&self) -> bool {
        self.response_metadata().is_some_and(|m| m.cache_hit)
    }

    pub fn has_error(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}
