// src/error.rs
//! Error taxonomy: the closed set of codes surfaced in the response envelope,
//! plus the typed errors raised by the injected collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Codes that can appear in `FetchResponse.errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    SanitizationFailed,
    NetworkTimeout,
    AuthFailed,
    CacheError,
    EmbeddingError,
    InvalidInput,
    BudgetExhausted,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::SanitizationFailed => "SANITIZATION_FAILED",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::CacheError => "CACHE_ERROR",
            ErrorCode::EmbeddingError => "EMBEDDING_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::BudgetExhausted => "BUDGET_EXHAUSTED",
        }
    }

    /// Only transient conditions are worth a caller-side retry.
    pub fn recoverable(&self) -> bool {
        matches!(self, ErrorCode::RateLimited | ErrorCode::NetworkTimeout)
    }

    /// Default human-readable message when the caller has nothing more specific.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "rate limit exceeded, retry after the window resets",
            ErrorCode::SanitizationFailed => "input rejected by sanitization, flagged for review",
            ErrorCode::NetworkTimeout => "trend source did not answer in time",
            ErrorCode::AuthFailed => "trend source rejected our credentials",
            ErrorCode::CacheError => "result cache unavailable",
            ErrorCode::EmbeddingError => "embedding provider failed",
            ErrorCode::InvalidInput => "request does not match the input contract",
            ErrorCode::BudgetExhausted => "remaining budget cannot cover another source call",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error entry of the response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl SkillError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.recoverable(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.message())
    }
}

/// Failures of the injected trend source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upstream rate limited")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Map onto the envelope code. Anything that is not auth or rate limiting
    /// is reported as a network timeout (the only transient transport code).
    pub fn code(&self) -> ErrorCode {
        match self {
            SourceError::Auth(_) => ErrorCode::AuthFailed,
            SourceError::RateLimited => ErrorCode::RateLimited,
            SourceError::Timeout(_) | SourceError::Network(_) | SourceError::Malformed(_) => {
                ErrorCode::NetworkTimeout
            }
        }
    }

    pub fn to_skill_error(&self, submolt: &str) -> SkillError {
        SkillError::new(self.code(), format!("{submolt}: {self}"))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(0)
        } else if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// Failures of the injected embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding provider returned an empty vector")]
    Empty,
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbeddingError::Timeout(0)
        } else {
            EmbeddingError::Request(e.to_string())
        }
    }
}

/// Failures of a cache backend. Never fatal for a fetch.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry could not be decoded: {0}")]
    Corrupt(String),
}
