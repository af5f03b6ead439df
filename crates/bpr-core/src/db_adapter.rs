//! Adapter layer for bpr-db.
//!
//! Bridges the storage crate with bpr-core's domain types:
//!
//! - Error conversion from `DbError` to `BprError`
//! - Building a `VectorIndexConfig` from the `index` config section
//!
//! ## Architecture
//!
//! ```text
//! bpr-core domain code (retriever, ingest, engine)
//!        ↓
//!   db_adapter (this module) - conversions
//!        ↓
//!     bpr-db implementations (file index, Qdrant REST)
//! ```

use std::sync::Arc;

use bpr_db::vector::{open_vector_index, VectorIndexBackend, VectorIndexConfig};
use bpr_db::DbError;

use crate::config::IndexConfig;
use crate::errors::BprError;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a bpr-db error raised while answering a query.
///
/// Every storage failure during retrieval means the index could not serve the
/// query, so all variants map to [`BprError::RetrievalUnavailable`].
pub fn from_db_error(err: DbError) -> BprError {
    BprError::RetrievalUnavailable {
        reason: err.to_string(),
    }
}

/// Convert a bpr-db error raised while opening or writing the index.
pub fn from_db_store_error(err: DbError) -> BprError {
    match err {
        DbError::Io(io_err) => BprError::Io(io_err),

        DbError::Json(json_err) => BprError::Json(json_err),

        DbError::IndexNotFound { path } => BprError::invalid_config(
            format!("No index found at {}", path.display()),
            "Run `bpr index <chunks.jsonl>` first or point index.path at an existing index",
        ),

        DbError::DimensionMismatch { expected, actual } => BprError::invalid_config(
            format!("Vector dimension mismatch: expected {}, got {}", expected, actual),
            "Make embedding.dimension match index.dimension and the stored vectors",
        ),

        DbError::IndexIncompatible { path, reason } => BprError::invalid_config(
            format!("Index at {} is incompatible: {}", path.display(), reason),
            "Re-create the index or adjust the index section to match it",
        ),

        DbError::Config { message } => BprError::invalid_config(message, "Check the index section"),

        err @ (DbError::Unreachable { .. }
        | DbError::RemoteStatus { .. }
        | DbError::MalformedResponse { .. }) => from_db_error(err),

        other => BprError::Other(anyhow::anyhow!(other)),
    }
}

/// Extension trait to convert DbResult for query paths.
pub trait IntoBprResult<T> {
    /// Convert a DbResult produced by a query.
    fn into_retrieval_result(self) -> Result<T, BprError>;

    /// Convert a DbResult produced by opening or writing the index.
    fn into_store_result(self) -> Result<T, BprError>;
}

impl<T> IntoBprResult<T> for bpr_db::DbResult<T> {
    fn into_retrieval_result(self) -> Result<T, BprError> {
        self.map_err(from_db_error)
    }

    fn into_store_result(self) -> Result<T, BprError> {
        self.map_err(from_db_store_error)
    }
}

// ============================================================================
// Index opening
// ============================================================================

/// Build the storage config for the `index` section.
pub fn vector_index_config(index: &IndexConfig, create_if_missing: bool) -> VectorIndexConfig {
    VectorIndexConfig::new(index.dimension, &index.path)
        .with_backend(&index.backend)
        .with_metric(index.metric)
        .with_remote(&index.url, &index.collection)
        .with_api_key(index.api_key.clone())
        .with_create_if_missing(create_if_missing)
        .with_timeout_secs(index.timeout_secs)
}

/// Open the configured chunk store.
///
/// Readers pass `create_if_missing = false` so a typo in `index.path` surfaces
/// as an error instead of an empty index.
pub fn open_index(
    index: &IndexConfig,
    create_if_missing: bool,
) -> Result<Arc<dyn VectorIndexBackend>, BprError> {
    let config = vector_index_config(index, create_if_missing);
    tracing::debug!(
        "Opening {} index (dimension={}, metric={})",
        config.backend,
        config.dimension,
        config.metric
    );
    open_vector_index(&config).into_store_result()
}
