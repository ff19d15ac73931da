// src/review.rs
//! Review sink: where flagged input and anomalies are reported for a human
//! (or judge agent) to look at. Submission is fire-and-forget and never
//! blocks the fetch path.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::rate_limit::Scope;
use crate::types::SanitizationVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// Request parameters were rejected or modified by the sanitizer.
    FlaggedInput,
    /// A topic coming back from the source failed sanitization.
    UnsafeTopic,
    /// A local window denied the call, or the upstream answered 429.
    RateLimited,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewEvent {
    pub kind: ReviewKind,
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub verdict: SanitizationVerdict,
    /// `field:rule` labels, never the raw text.
    pub findings: Vec<String>,
    /// Short hash of the offending text, when there is one.
    pub content_hash: Option<String>,
    pub submolt: Option<String>,
    /// Set for `RateLimited` events.
    pub scope: Option<Scope>,
    /// Hash of the limiter key (agent id or submolt).
    pub key_hash: Option<String>,
    /// Unknown for upstream 429s.
    pub retry_after_secs: Option<i64>,
    pub ts: DateTime<Utc>,
}

pub trait ReviewSink: Send + Sync {
    /// Must return immediately.
    fn submit(&self, event: ReviewEvent);
}

/// Writes events to the log. Default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReviewSink;

impl ReviewSink for LogReviewSink {
    fn submit(&self, ev: ReviewEvent) {
        tracing::warn!(
            target: "review",
            kind = ?ev.kind,
            task_id = %ev.task_id,
            agent_id = %ev.agent_id,
            verdict = ev.verdict.as_str(),
            findings = ?ev.findings,
            content = ev.content_hash.as_deref().unwrap_or("-"),
            submolt = ev.submolt.as_deref().unwrap_or("-"),
            scope = ev.scope.map(|s| s.as_str()).unwrap_or("-"),
            key = ev.key_hash.as_deref().unwrap_or("-"),
            retry_after_s = ev.retry_after_secs.unwrap_or(-1),
            "review requested"
        );
    }
}

/// Hands events to an in-process consumer. Drops when the queue is full.
#[derive(Debug, Clone)]
pub struct ChannelReviewSink {
    tx: mpsc::Sender<ReviewEvent>,
}

impl ChannelReviewSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReviewEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ReviewSink for ChannelReviewSink {
    fn submit(&self, ev: ReviewEvent) {
        if let Err(e) = self.tx.try_send(ev) {
            tracing::warn!(target: "review", error = %e, "review event dropped");
        }
    }
}

/// POSTs events as JSON to a webhook from a spawned task.
#[derive(Clone)]
pub struct WebhookReviewSink {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookReviewSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post(&self, ev: &ReviewEvent) -> anyhow::Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(ev)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match res {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(target: "review", attempt, error = %e, "webhook retry");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(anyhow::anyhow!("review webhook failed: {e}")),
            }
        }
    }
}

impl ReviewSink for WebhookReviewSink {
    fn submit(&self, ev: ReviewEvent) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(target: "review", "no runtime; review event dropped");
            return;
        };
        let sink = self.clone();
        rt.spawn(async move {
            if let Err(e) = sink.post(&ev).await {
                tracing::warn!(target: "review", error = %e, "review event lost");
            }
        });
    }
}
