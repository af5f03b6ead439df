//! Vector index backend implementations.
//!
//! ## Available Backends
//!
//! - `simple`: JSONL file backend with linear scan
//! - `qdrant`: Qdrant collection over REST

#[cfg(feature = "qdrant")]
mod qdrant;

#[cfg(feature = "simple")]
mod simple;

#[cfg(feature = "qdrant")]
pub use self::qdrant::QdrantVectorIndex;

#[cfg(feature = "simple")]
pub use simple::SimpleFileVectorIndex;

use super::config::{inspect_file_index, write_index_meta, VectorIndexConfig, VectorIndexMeta};
use super::traits::VectorIndexBackend;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Open a vector index with the given configuration.
///
/// For file-backed indexes this first checks the on-disk metadata and creates
/// a fresh index when none exists (and `create_if_missing` is set). Remote
/// backends do their own existence check on open.
///
/// # Errors
///
/// Returns an error if:
/// - The index exists but is incompatible
/// - The backend is unknown or not compiled in
/// - The index cannot be created or opened
pub fn open_vector_index(config: &VectorIndexConfig) -> DbResult<Arc<dyn VectorIndexBackend>> {
    if config.is_file_backed() {
        prepare_file_index(config)?;
    }

    match config.backend.as_str() {
        #[cfg(feature = "simple")]
        "simple" => {
            let index = SimpleFileVectorIndex::open(config)?;
            Ok(Arc::new(index))
        }

        #[cfg(feature = "qdrant")]
        "qdrant" => {
            let index = QdrantVectorIndex::open(config)?;
            Ok(Arc::new(index))
        }

        backend => Err(DbError::config(format!(
            "Unknown backend: '{}'. Available backends: {}",
            backend,
            available_backends().join(", ")
        ))),
    }
}

/// Validate the sidecar of a file index, creating a fresh index if allowed.
fn prepare_file_index(config: &VectorIndexConfig) -> DbResult<()> {
    match inspect_file_index(&config.path)? {
        Some(meta) => {
            meta.ensure_matches(config)?;
            debug!(
                "File index at {} holds {} points (schema v{})",
                config.path.display(),
                meta.count,
                meta.schema_version
            );
            Ok(())
        }
        None if config.create_if_missing => {
            info!("Creating file index at {}", config.path.display());
            write_index_meta(&config.path, &VectorIndexMeta::for_config(config))
        }
        None => Err(DbError::IndexNotFound {
            path: config.path.clone(),
        }),
    }
}

/// Get a list of available backend names.
#[allow(clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();

    #[cfg(feature = "simple")]
    backends.push("simple");

    #[cfg(feature = "qdrant")]
    backends.push("qdrant");

    backends
}

// ============================================================================
// Tests
// ============================================================================
