//! Embedding backends for query and chunk text.
//!
//! ## Providers
//!
//! - **local**: deterministic feature hashing of lower-cased word tokens. No
//!   model files and no network, so indexes built with it are reproducible and
//!   the whole pipeline can run offline.
//! - **ollama**: the Ollama HTTP API (`POST {host}/api/embed`).
//!
//! Every backend must return vectors of exactly [`EmbeddingBackend::dimension`]
//! components, in input order.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::errors::BprError;

/// Request timeout for the Ollama API.
const OLLAMA_TIMEOUT_SECS: u64 = 120;

/// Model id reported by the local hashing embedder.
pub const LOCAL_MODEL_ID: &str = "feature-hash-v1";

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Trait for embedding backends.
///
/// Implementations must be thread-safe; evaluation workers share one backend.
pub trait EmbeddingBackend: Send + Sync {
    /// Provider this backend implements.
    fn provider_kind(&self) -> EmbeddingProvider;

    /// Model identifier, recorded in reports.
    fn model_id(&self) -> &str;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts.
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BprError>;

    /// Embed a single text.
    fn embed(&self, input: &str) -> Result<Vec<f32>, BprError> {
        self.embed_batch(&[input.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| BprError::EmbeddingUnavailable {
                provider: self.provider_kind().to_string(),
                reason: "embed_batch returned no vectors".to_string(),
            })
    }
}

// ============================================================================
// Local hashing embedder
// ============================================================================

/// FNV-1a, 64 bit.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Deterministic bag-of-words embedder using signed feature hashing.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    dimension: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Hash one text into an L2-normalised vector. Text without words maps to
    /// the zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text.unicode_words() {
            let token = word.to_lowercase();
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl EmbeddingBackend for LocalHashEmbedder {
    fn provider_kind(&self) -> EmbeddingProvider {
        EmbeddingProvider::Local
    }

    fn model_id(&self) -> &str {
        LOCAL_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BprError> {
        Ok(inputs.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============================================================================
// Ollama embedder
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder calling a running Ollama server.
pub struct OllamaEmbedder {
    client: Client,
    host: String,
    model: String,
    dimension: usize,
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("host", &self.host)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OllamaEmbedder {
    /// Build a client. No request is made until the first embedding.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, BprError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(OLLAMA_TIMEOUT_SECS))
            .build()
            .map_err(|e| Self::unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn unavailable(reason: impl Into<String>) -> BprError {
        BprError::EmbeddingUnavailable {
            provider: EmbeddingProvider::Ollama.to_string(),
            reason: reason.into(),
        }
    }

    fn check(&self, inputs: &[String], vectors: &[Vec<f32>]) -> Result<(), BprError> {
        if vectors.len() != inputs.len() {
            return Err(Self::unavailable(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Self::unavailable(format!(
                "model {} returned dimension {}, configured {}",
                self.model,
                bad.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

impl EmbeddingBackend for OllamaEmbedder {
    fn provider_kind(&self) -> EmbeddingProvider {
        EmbeddingProvider::Ollama
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BprError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.host);
        trace!("POST {} ({} inputs)", url, inputs.len());

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: inputs,
            })
            .send()
            .map_err(|e| Self::unavailable(format!("{} unreachable: {}", self.host, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Self::unavailable(format!("HTTP {}: {}", status, body.trim())));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| Self::unavailable(format!("malformed response: {}", e)))?;

        self.check(inputs, &parsed.embeddings)?;
        Ok(parsed.embeddings)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Create the embedding backend named by the config.
pub fn create_backend(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>, BprError> {
    debug!(
        "Creating {} embedding backend (model={}, dimension={})",
        config.provider, config.model, config.dimension
    );
    match config.provider {
        EmbeddingProvider::Local => Ok(Box::new(LocalHashEmbedder::new(config.dimension))),
        EmbeddingProvider::Ollama => Ok(Box::new(OllamaEmbedder::new(config)?)),
    }
}
