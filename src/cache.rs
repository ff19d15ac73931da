// src/cache.rs
//! Result cache keyed by request fingerprint, absolute TTL (no sliding refresh).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::{CacheError, SkillError};
use crate::types::{FetchRequest, FetchStatus, TrendItem};

pub const DEFAULT_TTL_SECS: u64 = 3600;
/// One week. Larger TTLs are clamped.
pub const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

/// Deterministic SHA-256 digest of the parameters that shape the result.
/// Task id, budget, agent and campaign are excluded; they do not change
/// which trends come back.
pub fn fingerprint(req: &FetchRequest) -> String {
    fn norm_list(items: &[String]) -> Vec<String> {
        let mut v: Vec<String> = items
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        v.sort();
        v.dedup();
        v
    }

    let p = &req.parameters;
    let sources = match &p.submolts {
        Some(s) => norm_list(s).join(","),
        None => "*".to_string(),
    };

    let mut hasher = Sha256::new();
    for part in [
        format!("submolts={sources}"),
        format!("time_range={}", p.time_range.as_str()),
        format!("min_engagement={}", p.min_engagement),
        format!("persona_tags={}", norm_list(&p.persona_tags).join(",")),
        format!("max_topics={}", p.max_topics),
        format!(
            "persona_constraints={}",
            norm_list(req.persona_constraints()).join(",")
        ),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// What gets replayed on a cache hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub status: FetchStatus,
    pub trends: Vec<TrendItem>,
    pub errors: Vec<SkillError>,
    pub sources_queried: Vec<String>,
    pub sources_skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<CachedPayload>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Expired entries behave as a miss.
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError>;
    /// Overwrites any previous entry and restarts its TTL.
    async fn put(&self, fingerprint: &str, payload: CachedPayload) -> Result<(), CacheError>;
    fn ttl_secs(&self) -> u64;
    /// Drop expired entries, returning how many went. Backends with their
    /// own expiry keep the default.
    async fn evict_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// In-process cache. Entries are swapped in whole under a write lock, so a
/// reader sees either the old entry or the new one, never a mix.
#[derive(Debug)]
pub struct MemoryCache {
    ttl_secs: u64,
    clock: SharedClock,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(ttl_secs: u64, clock: SharedClock) -> Self {
        Self {
            ttl_secs: ttl_secs.clamp(1, MAX_TTL_SECS),
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Eager eviction of everything that has expired.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(fingerprint) {
                None => return Ok(None),
                Some(e) if !e.is_expired(now) => return Ok(Some(e.clone())),
                Some(_) => {}
            }
        }

        // lazy eviction; re-check, a fresh put may have raced in
        let mut entries = self.entries.write();
        if entries.get(fingerprint).is_some_and(|e| e.is_expired(now)) {
            entries.remove(fingerprint);
            tracing::debug!(target: "cache", "evicted expired entry");
        }
        Ok(None)
    }

    async fn put(&self, fingerprint: &str, payload: CachedPayload) -> Result<(), CacheError> {
        let now = self.clock.now();
        let entry = CacheEntry {
            payload: Arc::new(payload),
            created_at: now,
            expires_at: now + Duration::seconds(self.ttl_secs as i64),
        };
        self.entries.write().insert(fingerprint.to_string(), entry);
        Ok(())
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    async fn evict_expired(&self) -> Result<usize, CacheError> {
        Ok(self.purge_expired())
    }
}
