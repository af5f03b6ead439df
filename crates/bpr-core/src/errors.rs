//! Error types for bpr-core.

use std::path::PathBuf;

use thiserror::Error;

/// Domain-specific errors for retrieval evaluation and ranking.
#[derive(Error, Debug)]
pub enum BprError {
    // =========================================================================
    // Pipeline conditions
    // =========================================================================
    /// The vector index could not serve a query (unreachable, failed, or
    /// returned a response we could not use).
    ///
    /// Never retried inside the core. The evaluation harness records it on the
    /// affected query and moves on.
    #[error("Retrieval unavailable: {reason}")]
    RetrievalUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// A hit payload carries a field the reranker uses, but with the wrong shape.
    ///
    /// Signals treat this as a non-match; the variant exists so the condition
    /// can be reported in debug records.
    #[error("Malformed payload in chunk `{chunk_id}`: field `{field}` {reason}")]
    MalformedPayload {
        /// Chunk carrying the payload.
        chunk_id: String,
        /// The offending payload field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A relevance judgment exists for the query but lists no relevant riders.
    #[error("Query `{query_id}` has an empty relevance set and cannot be scored.")]
    EmptyRelevanceSet {
        /// The affected query.
        query_id: String,
    },

    /// No relevance judgment exists for the query.
    #[error("No ground truth for query `{query_id}`.")]
    NoGroundTruth {
        /// The affected query.
        query_id: String,
    },

    // =========================================================================
    // Configuration and input
    // =========================================================================
    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// Invalid argument provided to an operation.
    #[error("{0}")]
    InvalidArgument(String),

    /// A dataset file (queries, qrels, labels, chunks) could not be read.
    #[error("Dataset error in {path} line {line}: {reason}")]
    Dataset {
        /// The dataset file.
        path: PathBuf,
        /// 1-based line number (0 when the whole file is affected).
        line: usize,
        /// Description of the problem.
        reason: String,
    },

    /// The embedding provider could not produce vectors.
    #[error("Embedding provider `{provider}` unavailable: {reason}")]
    EmbeddingUnavailable {
        /// Provider name.
        provider: String,
        /// Description of the failure.
        reason: String,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled.")]
    Cancelled,

    // =========================================================================
    // Wrappers
    // =========================================================================
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wrapped generic error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BprError {
    /// Create a retrieval-unavailable error.
    pub fn retrieval_unavailable(reason: impl Into<String>) -> Self {
        Self::RetrievalUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create a dataset error.
    pub fn dataset(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Whether the error aborts only the current query rather than the run.
    pub fn is_per_query(&self) -> bool {
        matches!(
            self,
            Self::RetrievalUnavailable { .. } | Self::EmbeddingUnavailable { .. }
        )
    }
}
