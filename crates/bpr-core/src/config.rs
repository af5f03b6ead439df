//! Configuration for bpr.
//!
//! A single YAML file (`~/.bpr/config.yaml` by default) with one section per
//! pipeline concern. Every field has a default, so a missing file or a partial
//! file is valid. CLI flags are applied on top through [`ConfigOverrides`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bpr_db::vector::{VectorMetric, DEFAULT_COLLECTION, DEFAULT_QDRANT_URL, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

use crate::errors::BprError;
use crate::signals::default_weights;

// ======================================================================
// Defaults
// ======================================================================

/// Directory under the home directory holding config and the default index.
pub const BPR_HOME_DIR: &str = ".bpr";

/// Config file name inside [`BPR_HOME_DIR`].
pub const CONFIG_FILENAME: &str = "config.yaml";

pub const DEFAULT_K: usize = 10;
pub const DEFAULT_OVERSAMPLE_FACTOR: usize = 5;
pub const DEFAULT_DIMENSION: usize = 384;
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;
pub const DEFAULT_CLAMP: f64 = 0.05;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_MRR_EPSILON: f64 = 1e-12;
pub const DEFAULT_DIAG_KS: [usize; 5] = [1, 3, 5, 10, 20];
pub const DEFAULT_WORST_N: usize = 10;
pub const DEFAULT_PREVIEW_LEN: usize = 5;
pub const DEFAULT_REPORT_DIR: &str = "reports/retrieval";

/// Oversample factors above this are allowed but suspicious.
const OVERSAMPLE_WARN_THRESHOLD: usize = 20;

// ======================================================================
// BprConfig
// ======================================================================

/// Top-level configuration.
///
/// # Example YAML
///
/// ```yaml
/// retrieval:
///   k: 10
///   oversampleFactor: 5
/// index:
///   backend: qdrant
///   url: http://localhost:6333
///   collection: bikepacking_riders_v2
/// embedding:
///   provider: ollama
///   model: nomic-embed-text
///   dimension: 768
/// rerank:
///   enabled: true
///   clamp: 0.05
///   weights:
///     event_match: 0.03
/// eval:
///   maxConcurrency: 8
///   emptyQrelPolicy: countAsZero
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BprConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub eval: EvalConfig,
}

impl BprConfig {
    /// Load from the default location, falling back to defaults.
    pub fn load_default() -> Result<Self, BprError> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load the configuration from a specific path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BprError::InvalidConfiguration`] if the file cannot be read,
    /// parsed, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, BprError> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            BprError::invalid_config(
                format!("Failed to read {}: {}", path.display(), e),
                "Check the file permissions or pass another file with --config",
            )
        })?;

        Self::from_yaml_str(&content).map_err(|e| match e {
            BprError::Yaml(err) => BprError::invalid_config(
                format!("Failed to parse {}: {}", path.display(), err),
                "The file must be YAML with camelCase keys",
            ),
            other => other,
        })
    }

    /// Parse and validate YAML content, logging warnings.
    pub fn from_yaml_str(content: &str) -> Result<Self, BprError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let warnings = config.validate()?;
        for warning in warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Get the default config directory (`~/.bpr`).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(BPR_HOME_DIR))
    }

    /// Get the default config file path (`~/.bpr/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|d| d.join(CONFIG_FILENAME))
    }

    /// Validate every section.
    ///
    /// Returns warnings for questionable values; the first fatal problem is
    /// returned as [`BprError::InvalidConfiguration`].
    pub fn validate(&self) -> Result<Vec<String>, BprError> {
        let mut warnings = Vec::new();
        warnings.extend(self.retrieval.validate()?);
        warnings.extend(self.index.validate()?);
        warnings.extend(self.embedding.validate()?);
        warnings.extend(self.rerank.validate()?);
        warnings.extend(self.eval.validate()?);

        if self.embedding.dimension != self.index.dimension {
            warnings.push(format!(
                "embedding.dimension ({}) differs from index.dimension ({}); queries will fail",
                self.embedding.dimension, self.index.dimension
            ));
        }

        Ok(warnings)
    }

    /// Oversample factor actually used: the configured one with reranking, 1 without.
    pub fn effective_oversample(&self) -> usize {
        if self.rerank.enabled {
            self.retrieval.oversample_factor
        } else {
            1
        }
    }

    /// Apply CLI overrides and re-validate.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<Vec<String>, BprError> {
        if let Some(k) = overrides.k {
            self.retrieval.k = k;
        }
        if let Some(factor) = overrides.oversample_factor {
            self.retrieval.oversample_factor = factor;
        }
        if overrides.no_rerank {
            self.rerank.enabled = false;
        }
        if let Some(concurrency) = overrides.max_concurrency {
            self.eval.max_concurrency = concurrency;
        }
        if let Some(policy) = overrides.empty_qrel_policy {
            self.eval.empty_qrel_policy = policy;
        }
        if let Some(event_key) = &overrides.event_key {
            self.retrieval.event_key = Some(event_key.clone());
        }
        self.validate()
    }
}

/// Values supplied on the command line, applied over the file configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub k: Option<usize>,
    pub oversample_factor: Option<usize>,
    pub no_rerank: bool,
    pub max_concurrency: Option<usize>,
    pub empty_qrel_policy: Option<EmptyQrelPolicy>,
    pub event_key: Option<String>,
}

// ======================================================================
// RetrievalConfig
// ======================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Cutoff for rankings and metrics.
    #[serde(default = "default_k")]
    pub k: usize,

    /// Candidates requested per final slot when reranking is enabled.
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,

    /// Restrict retrieval to chunks whose payload `event_key` equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_oversample_factor() -> usize {
    DEFAULT_OVERSAMPLE_FACTOR
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            oversample_factor: default_oversample_factor(),
            event_key: None,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<Vec<String>, BprError> {
        let mut warnings = Vec::new();

        if self.k == 0 {
            return Err(BprError::invalid_config(
                "retrieval.k cannot be 0",
                "Set k to at least 1 (recommended: 5-20)",
            ));
        }

        if self.oversample_factor == 0 {
            return Err(BprError::invalid_config(
                "retrieval.oversampleFactor cannot be 0",
                "Set oversampleFactor to 1 to disable oversampling",
            ));
        }

        if self.oversample_factor > OVERSAMPLE_WARN_THRESHOLD {
            warnings.push(format!(
                "retrieval.oversampleFactor={} is very large; each query will request {} candidates",
                self.oversample_factor,
                self.k.saturating_mul(self.oversample_factor)
            ));
        }

        Ok(warnings)
    }
}

// ======================================================================
// IndexConfig
// ======================================================================

/// Which chunk store to query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    /// `simple` (file) or `qdrant`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Directory of the file index.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub metric: VectorMetric,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> String {
    bpr_db::vector::DEFAULT_BACKEND.to_string()
}

fn default_index_path() -> PathBuf {
    BprConfig::default_dir()
        .unwrap_or_else(|| PathBuf::from(BPR_HOME_DIR))
        .join("index")
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_index_path(),
            dimension: default_dimension(),
            metric: VectorMetric::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<Vec<String>, BprError> {
        let mut warnings = Vec::new();

        if self.dimension == 0 {
            return Err(BprError::invalid_config(
                "index.dimension cannot be 0",
                "Set dimension to the embedding model's output size (e.g. 384 or 768)",
            ));
        }

        let available = bpr_db::vector::available_backends();
        if !available.contains(&self.backend.as_str()) {
            return Err(BprError::invalid_config(
                format!("index.backend `{}` is not available", self.backend),
                format!("Use one of: {}", available.join(", ")),
            ));
        }

        if self.backend == "qdrant" && self.timeout_secs == 0 {
            warnings.push(
                "index.timeoutSecs=0 disables the request timeout for Qdrant".to_string(),
            );
        }

        Ok(warnings)
    }
}

// ======================================================================
// EmbeddingConfig
// ======================================================================

/// Which embedding provider turns query text into vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic feature-hashing embedder, no network.
    #[default]
    Local,
    /// Ollama HTTP API.
    Ollama,
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProvider::Local => write!(f, "local"),
            EmbeddingProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_ollama_host")]
    pub host: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts embedded per request during ingestion.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

fn default_embedding_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            host: default_ollama_host(),
            dimension: default_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<Vec<String>, BprError> {
        if self.dimension == 0 {
            return Err(BprError::invalid_config(
                "embedding.dimension cannot be 0",
                "Set dimension to the model's output size",
            ));
        }
        if self.batch_size == 0 {
            return Err(BprError::invalid_config(
                "embedding.batchSize cannot be 0",
                "Set batchSize to at least 1 (recommended: 16-64)",
            ));
        }
        Ok(Vec::new())
    }
}

// ======================================================================
// RerankConfig
// ======================================================================

/// Deterministic reranker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankConfig {
    #[serde(default = "default_rerank_enabled")]
    pub enabled: bool,

    /// Global clamp B on the summed signal deltas.
    #[serde(default = "default_clamp")]
    pub clamp: f64,

    /// Weight per signal name. Missing names keep their default weight.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
}

fn default_rerank_enabled() -> bool {
    true
}

fn default_clamp() -> f64 {
    DEFAULT_CLAMP
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: default_rerank_enabled(),
            clamp: default_clamp(),
            weights: default_weights(),
        }
    }
}

impl RerankConfig {
    pub fn validate(&self) -> Result<Vec<String>, BprError> {
        let mut warnings = Vec::new();

        if !self.clamp.is_finite() || self.clamp < 0.0 {
            return Err(BprError::invalid_config(
                format!("rerank.clamp must be a finite value >= 0, got {}", self.clamp),
                "Set clamp to a small value such as 0.05",
            ));
        }

        let known = default_weights();
        for (name, weight) in &self.weights {
            if !known.contains_key(name) {
                warnings.push(format!("rerank.weights.{} is not a known signal; ignored", name));
            } else if !weight.is_finite() {
                return Err(BprError::invalid_config(
                    format!("rerank.weights.{} must be finite", name),
                    "Use a small signed value such as 0.02",
                ));
            } else if weight.abs() > self.clamp {
                warnings.push(format!(
                    "rerank.weights.{}={} exceeds the clamp ({}); its effect will be capped",
                    name, weight, self.clamp
                ));
            }
        }

        Ok(warnings)
    }
}

// ======================================================================
// EvalConfig
// ======================================================================

/// How queries whose relevance set is empty enter the aggregate metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyQrelPolicy {
    /// Leave them out of the means.
    #[default]
    Exclude,
    /// Average them in as zeros.
    CountAsZero,
}

impl std::str::FromStr for EmptyQrelPolicy {
    type Err = BprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "exclude" => Ok(Self::Exclude),
            "countaszero" | "zero" => Ok(Self::CountAsZero),
            _ => Err(BprError::InvalidArgument(format!(
                "Unknown empty-qrel policy `{}`; expected `exclude` or `count-as-zero`",
                s
            ))),
        }
    }
}

impl std::fmt::Display for EmptyQrelPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmptyQrelPolicy::Exclude => write!(f, "exclude"),
            EmptyQrelPolicy::CountAsZero => write!(f, "countAsZero"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalConfig {
    /// Worker threads evaluating queries in parallel.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub empty_qrel_policy: EmptyQrelPolicy,

    /// Tolerance when comparing reranked and baseline MRR.
    #[serde(default = "default_mrr_epsilon")]
    pub mrr_epsilon: f64,

    /// Cutoffs for the per-query diagnostics block.
    #[serde(default = "default_diag_ks")]
    pub diag_ks: Vec<usize>,

    /// Entries in the worst-queries list.
    #[serde(default = "default_worst_n")]
    pub worst_n: usize,

    /// Hits shown in report previews.
    #[serde(default = "default_preview_len")]
    pub preview_len: usize,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_mrr_epsilon() -> f64 {
    DEFAULT_MRR_EPSILON
}

fn default_diag_ks() -> Vec<usize> {
    DEFAULT_DIAG_KS.to_vec()
}

fn default_worst_n() -> usize {
    DEFAULT_WORST_N
}

fn default_preview_len() -> usize {
    DEFAULT_PREVIEW_LEN
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REPORT_DIR)
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            empty_qrel_policy: EmptyQrelPolicy::default(),
            mrr_epsilon: default_mrr_epsilon(),
            diag_ks: default_diag_ks(),
            worst_n: default_worst_n(),
            preview_len: default_preview_len(),
            report_dir: default_report_dir(),
        }
    }
}

impl EvalConfig {
    pub fn validate(&self) -> Result<Vec<String>, BprError> {
        let mut warnings = Vec::new();

        if self.max_concurrency == 0 {
            return Err(BprError::invalid_config(
                "eval.maxConcurrency cannot be 0",
                "Set maxConcurrency to at least 1",
            ));
        }

        if let Some(bad) = self.diag_ks.iter().find(|k| **k == 0) {
            return Err(BprError::invalid_config(
                format!("eval.diagKs contains {}", bad),
                "Every diagnostic cutoff must be at least 1",
            ));
        }

        if !self.mrr_epsilon.is_finite() || self.mrr_epsilon < 0.0 {
            return Err(BprError::invalid_config(
                "eval.mrrEpsilon must be a finite value >= 0",
                "Use the default 1e-12 unless you need a looser tie",
            ));
        }

        if self.max_concurrency > 64 {
            warnings.push(format!(
                "eval.maxConcurrency={} may overload the vector store",
                self.max_concurrency
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// Tests
// ============================================================================
