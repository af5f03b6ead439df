//! Chunk store configuration and the `index.meta.json` sidecar of file indexes.

use super::traits::VectorMetric;
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_BACKEND: &str = "simple";

/// Sidecar written next to the data of a file index.
pub const INDEX_META_FILENAME: &str = "index.meta.json";

pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";

/// Collection holding the rider chunks in production.
pub const DEFAULT_COLLECTION: &str = "bikepacking_riders_v2";

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// VectorIndexConfig
// ============================================================================

/// Where the chunk store lives and how vectors are compared.
///
/// `path` is used by the file backend; `url`, `collection`, `api_key` and
/// `timeout_secs` by Qdrant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexConfig {
    pub dimension: usize,
    pub path: PathBuf,

    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub metric: VectorMetric,

    /// Create an empty store on open instead of failing with `IndexNotFound`.
    #[serde(default = "yes")]
    pub create_if_missing: bool,

    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Sent as the `api-key` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn yes() -> bool {
    true
}

fn default_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl VectorIndexConfig {
    /// File-backed cosine store at `path`, created on first open.
    pub fn new(dimension: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            path: path.into(),
            backend: default_backend(),
            metric: VectorMetric::default(),
            create_if_missing: true,
            url: default_url(),
            collection: default_collection(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_metric(mut self, metric: VectorMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_remote(mut self, url: impl Into<String>, collection: impl Into<String>) -> Self {
        self.url = url.into();
        self.collection = collection.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Whether the store is a local directory (and so carries a sidecar).
    pub fn is_file_backed(&self) -> bool {
        self.backend == DEFAULT_BACKEND
    }
}

// ============================================================================
// Sidecar
// ============================================================================

/// Contents of `index.meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexMeta {
    pub backend: String,
    pub dimension: usize,
    pub metric: VectorMetric,

    /// Point count at the last write.
    #[serde(default)]
    pub count: usize,

    #[serde(default = "schema_version")]
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

impl VectorIndexMeta {
    pub fn new(backend: impl Into<String>, dimension: usize, metric: VectorMetric) -> Self {
        let now = Utc::now();
        Self {
            backend: backend.into(),
            dimension,
            metric,
            count: 0,
            schema_version: SCHEMA_VERSION,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Sidecar for a fresh store described by `config`.
    pub fn for_config(config: &VectorIndexConfig) -> Self {
        Self::new(&config.backend, config.dimension, config.metric)
    }

    pub fn update_count(&mut self, count: usize) {
        self.count = count;
        self.updated_at = Some(Utc::now());
    }

    /// Reject a sidecar that disagrees with `config` on dimension, backend or metric.
    pub fn ensure_matches(&self, config: &VectorIndexConfig) -> DbResult<()> {
        if self.dimension != config.dimension {
            return Err(DbError::DimensionMismatch {
                expected: config.dimension,
                actual: self.dimension,
            });
        }
        if self.backend != config.backend {
            return Err(DbError::index_incompatible(
                &config.path,
                format!("written by backend '{}', opened as '{}'", self.backend, config.backend),
            ));
        }
        if self.metric != config.metric {
            return Err(DbError::index_incompatible(
                &config.path,
                format!("built with metric '{}', opened with '{}'", self.metric, config.metric),
            ));
        }
        Ok(())
    }
}

/// Read the sidecar of a file index.
///
/// `Ok(None)` means there is no index yet: the directory is absent or empty.
/// A directory with files but no sidecar is reported as incompatible rather
/// than silently overwritten.
pub fn inspect_file_index(dir: &Path) -> DbResult<Option<VectorIndexMeta>> {
    if dir.join(INDEX_META_FILENAME).exists() {
        return load_index_meta(dir).map(Some);
    }

    let has_files = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if has_files {
        Err(DbError::index_incompatible(
            dir,
            format!("directory is not empty but has no {}", INDEX_META_FILENAME),
        ))
    } else {
        Ok(None)
    }
}

pub fn load_index_meta(dir: &Path) -> DbResult<VectorIndexMeta> {
    let meta_path = dir.join(INDEX_META_FILENAME);
    debug!("Reading {}", meta_path.display());

    let content = fs::read_to_string(&meta_path)
        .map_err(|e| DbError::vector_io(&meta_path, e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| DbError::vector_parse(&meta_path, e.to_string()))
}

pub fn write_index_meta(dir: &Path, meta: &VectorIndexMeta) -> DbResult<()> {
    fs::create_dir_all(dir)?;
    let meta_path = dir.join(INDEX_META_FILENAME);
    fs::write(&meta_path, serde_json::to_string_pretty(meta)?)?;
    debug!("Wrote {}", meta_path.display());
    Ok(())
}
