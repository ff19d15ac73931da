// src/config.rs
//! Fetcher configuration: TOML file + env overrides.
//!
//! Lookup order for the file:
//! 1) $TREND_FETCHER_CONFIG_PATH (must exist)
//! 2) config/fetcher.toml
//! 3) built-in defaults

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_TTL_SECS, MAX_TTL_SECS};
use crate::rate_limit::MAX_WINDOW_SECS;
use crate::relevance::{clamp_threshold, ENV_RELEVANCE_THRESHOLD, RELEVANCE_THRESHOLD};

pub const ENV_CONFIG_PATH: &str = "TREND_FETCHER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/fetcher.toml";

pub const ENV_ORCHESTRATOR_LIMIT: &str = "TREND_FETCHER_ORCHESTRATOR_LIMIT";
pub const ENV_ORCHESTRATOR_WINDOW_SECS: &str = "TREND_FETCHER_ORCHESTRATOR_WINDOW_SECS";
pub const ENV_SOURCE_LIMIT: &str = "TREND_FETCHER_SOURCE_LIMIT";
pub const ENV_SOURCE_WINDOW_SECS: &str = "TREND_FETCHER_SOURCE_WINDOW_SECS";
pub const ENV_CACHE_TTL_SECS: &str = "TREND_FETCHER_CACHE_TTL_SECS";

/// Sources picked when a request names none.
pub const DEFAULT_SOURCE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub orchestrator_limit: u32,
    pub orchestrator_window_secs: u64,
    pub source_limit: u32,
    pub source_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            orchestrator_limit: 10,
            orchestrator_window_secs: 60,
            source_limit: 1,
            source_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub source_ms: u64,
    pub embedding_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            source_ms: 5_000,
            embedding_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub threshold: f32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            threshold: RELEVANCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Charged against `budget_remaining` per trend source call.
    pub cost_per_source_call: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cost_per_source_call: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MoltbookConfig {
    pub base_url: String,
    /// Name of the env var holding the API key (the key itself never lives in the file).
    pub api_key_env: String,
    /// Serve trends from a JSON fixture instead of the live API.
    pub fixture_path: Option<String>,
}

impl Default for MoltbookConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.moltbook.com/v1".into(),
            api_key_env: "MOLTBOOK_API_KEY".into(),
            fixture_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Hashing,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub url: String,
    pub model: String,
    /// Only used by the hashing backend.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hashing,
            url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            dimension: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_catalog() -> Vec<CatalogEntry> {
    let entry = |name: &str, tags: &[&str]| CatalogEntry {
        name: name.into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    };
    vec![
        entry("r/AgentTech", &["tech", "ai", "agents", "automation"]),
        entry("r/AICollaboration", &["ai", "collaboration", "agents", "productivity"]),
        entry("r/GenZCulture", &["genz", "culture", "memes", "fashion"]),
        entry("r/CryptoAgents", &["crypto", "defi", "web3", "finance"]),
        entry("r/CreatorEconomy", &["creators", "marketing", "influencer", "brand"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub limits: LimitsConfig,
    pub cache: CacheConfig,
    pub timeouts: TimeoutsConfig,
    pub relevance: RelevanceConfig,
    pub budget: BudgetConfig,
    pub moltbook: MoltbookConfig,
    pub embedding: EmbeddingConfig,
    pub review: ReviewConfig,
    pub catalog: Vec<CatalogEntry>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            cache: CacheConfig::default(),
            timeouts: TimeoutsConfig::default(),
            relevance: RelevanceConfig::default(),
            budget: BudgetConfig::default(),
            moltbook: MoltbookConfig::default(),
            embedding: EmbeddingConfig::default(),
            review: ReviewConfig::default(),
            catalog: default_catalog(),
        }
    }
}

impl FetcherConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: FetcherConfig = toml::from_str(s).context("parsing fetcher config")?;
        Ok(cfg.normalized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading fetcher config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// File (env path, then default path, then built-ins) with env overrides applied.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        Ok(base.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<u32>(ENV_ORCHESTRATOR_LIMIT) {
            self.limits.orchestrator_limit = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_ORCHESTRATOR_WINDOW_SECS) {
            self.limits.orchestrator_window_secs = v;
        }
        if let Some(v) = env_parse::<u32>(ENV_SOURCE_LIMIT) {
            self.limits.source_limit = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_SOURCE_WINDOW_SECS) {
            self.limits.source_window_secs = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_CACHE_TTL_SECS) {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_parse::<f32>(ENV_RELEVANCE_THRESHOLD) {
            self.relevance.threshold = v;
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.limits.orchestrator_window_secs =
            self.limits.orchestrator_window_secs.clamp(1, MAX_WINDOW_SECS);
        self.limits.source_window_secs = self.limits.source_window_secs.clamp(1, MAX_WINDOW_SECS);
        self.cache.ttl_secs = self.cache.ttl_secs.clamp(1, MAX_TTL_SECS);
        self.relevance.threshold = clamp_threshold(self.relevance.threshold);
        if !self.budget.cost_per_source_call.is_finite() || self.budget.cost_per_source_call < 0.0 {
            self.budget.cost_per_source_call = BudgetConfig::default().cost_per_source_call;
        }
        self.timeouts.source_ms = self.timeouts.source_ms.max(1);
        self.timeouts.embedding_ms = self.timeouts.embedding_ms.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Top catalogue sources for a persona: ranked by how many tags they share
/// (case-insensitive), ties broken by catalogue order.
pub fn select_default_sources(
    catalog: &[CatalogEntry],
    persona_tags: &[String],
    n: usize,
) -> Vec<String> {
    let wanted: Vec<String> = persona_tags.iter().map(|t| t.trim().to_lowercase()).collect();
    let mut ranked: Vec<(usize, usize)> = catalog
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let overlap = e
                .tags
                .iter()
                .filter(|t| wanted.contains(&t.to_lowercase()))
                .count();
            (i, overlap)
        })
        .collect();
    // stable sort keeps catalogue order among equals
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(n)
        .map(|(i, _)| catalog[i].name.clone())
        .collect()
}
