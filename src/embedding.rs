// src/embedding.rs
//! Embedding provider abstraction.
//!
//! - `OllamaEmbeddings`: remote model behind an Ollama-compatible endpoint.
//! - `HashingEmbeddings`: deterministic local feature hashing, for offline
//!   runs and demos. Similar wording gives similar vectors; it is not a
//!   semantic model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::EmbeddingError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn name(&self) -> &'static str;
}

/// Get embedding dimension for known models
pub fn model_dimension(model: &str) -> usize {
    match model {
        "mxbai-embed-large" | "bge-large" => 1024,
        "all-minilm" => 384,
        _ => 768,
    }
}

pub struct OllamaEmbeddings {
    http: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbedReq<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResp {
    embedding: Vec<f32>,
}

impl OllamaEmbeddings {
    pub fn new(url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension: model_dimension(model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let resp = self
            .http
            .post(format!("{}/api/embeddings", self.url))
            .json(&EmbedReq {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EmbeddingError::Request(format!("status {}", resp.status())));
        }
        let body: EmbedResp = resp.json().await?;
        if body.embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if body.embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                got: body.embedding.len(),
            });
        }
        Ok(body.embedding)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbeddings {
    dimension: usize,
}

impl HashingEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashingEmbeddings {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(EmbeddingError::Empty);
        }
        v.iter_mut().for_each(|x| *x /= norm);
        Ok(v)
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}
