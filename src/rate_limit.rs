// src/rate_limit.rs
//! Keyed fixed-window rate limiting.
//!
//! Two independent limiters guard a fetch:
//! - orchestrator scope, keyed by agent id (default 10 requests / 60s)
//! - source scope, keyed by submolt name (default 1 request / 300s)
//!
//! Each key owns a window that starts at its first admitted request and
//! resets once the window length has elapsed. Check-and-increment happens
//! under one lock, so concurrent callers can never push a key past its limit.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::clock::SharedClock;

/// Longest window accepted; anything larger is clamped.
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Orchestrator,
    Source,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Orchestrator => "orchestrator",
            Scope::Source => "source",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::seconds(window_secs.clamp(1, MAX_WINDOW_SECS) as i64),
        }
    }

    pub fn orchestrator_default() -> Self {
        Self::new(10, 60)
    }

    pub fn source_default() -> Self {
        Self::new(1, 300)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `count` includes this request.
    Admitted { count: u32 },
    Denied { count: u32, retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    pub fn count(&self) -> u32 {
        match self {
            Admission::Admitted { count } | Admission::Denied { count, .. } => *count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started_at: DateTime<Utc>,
}

impl RateWindow {
    fn elapsed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.started_at >= window
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    scope: Scope,
    policy: RateLimitPolicy,
    clock: SharedClock,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(scope: Scope, policy: RateLimitPolicy, clock: SharedClock) -> Self {
        Self {
            scope,
            policy,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Count one attempt against `key`. Never blocks.
    pub fn admit(&self, key: &str) -> Admission {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let w = windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            started_at: now,
        });

        if w.elapsed(now, self.policy.window) {
            w.count = 0;
            w.started_at = now;
        }

        if w.count >= self.policy.limit {
            let retry_after = (w.started_at + self.policy.window) - now;
            tracing::debug!(
                target: "rate_limit",
                scope = self.scope.as_str(),
                count = w.count,
                limit = self.policy.limit,
                retry_after_s = retry_after.num_seconds(),
                "denied"
            );
            return Admission::Denied {
                count: w.count,
                retry_after,
            };
        }

        w.count += 1;
        Admission::Admitted { count: w.count }
    }

    /// Requests counted in the key's current window (0 once it has elapsed).
    pub fn current(&self, key: &str) -> u32 {
        let now = self.clock.now();
        let windows = self.windows.lock();
        match windows.get(key) {
            Some(w) if !w.elapsed(now, self.policy.window) => w.count,
            _ => 0,
        }
    }

    /// Keys currently holding a window, elapsed or not.
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }

    /// Drop windows that have fully elapsed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let window = self.policy.window;
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| !w.elapsed(now, window));
        before - windows.len()
    }
}

/// The pair of limiters a fetch goes through.
#[derive(Debug)]
pub struct RateLimits {
    pub orchestrator: RateLimiter,
    pub source: RateLimiter,
}

impl RateLimits {
    pub fn new(
        orchestrator: RateLimitPolicy,
        source: RateLimitPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            orchestrator: RateLimiter::new(Scope::Orchestrator, orchestrator, clock.clone()),
            source: RateLimiter::new(Scope::Source, source, clock),
        }
    }

    /// Prune both scopes; returns how many windows were dropped.
    pub fn prune(&self) -> usize {
        self.orchestrator.prune() + self.source.prune()
    }

    pub fn admit(&self, key: &str, scope: Scope) -> Admission {
        match scope {
            Scope::Orchestrator => self.orchestrator.admit(key),
            Scope::Source => self.source.admit(key),
        }
    }
}
