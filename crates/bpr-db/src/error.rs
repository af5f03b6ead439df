//! Error types for bpr-db.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bpr-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in bpr-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Vector index errors
    // ========================================================================
    /// Vector index I/O error.
    #[error("Vector index I/O error at {path}: {message}")]
    VectorIo { path: PathBuf, message: String },

    /// Vector index parse error.
    #[error("Vector index parse error at {path}: {message}")]
    VectorParse { path: PathBuf, message: String },

    /// Vector dimension mismatch.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector index not found.
    #[error("Vector index not found at {path}")]
    IndexNotFound { path: PathBuf },

    /// Vector index incompatible with the requested configuration.
    #[error("Vector index at {path} is incompatible: {reason}")]
    IndexIncompatible { path: PathBuf, reason: String },

    // ========================================================================
    // Remote store errors
    // ========================================================================
    /// The remote vector store could not be reached.
    #[error("Vector store at {url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    /// The remote vector store answered with a non-success status.
    #[error("Vector store request to {url} failed with status {status}: {body}")]
    RemoteStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// The remote vector store answered with a body we could not decode.
    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    // ========================================================================
    // General errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a vector I/O error.
    pub fn vector_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VectorIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a vector parse error.
    pub fn vector_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VectorParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an index incompatible error.
    pub fn index_incompatible(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexIncompatible {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an unreachable-store error.
    pub fn unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed_response(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error means the store could not serve the request at all
    /// (as opposed to a local misuse such as a wrong dimension).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::RemoteStatus { .. }
                | Self::MalformedResponse { .. }
                | Self::IndexNotFound { .. }
                | Self::VectorIo { .. }
                | Self::Io(_)
        )
    }
}

#[cfg(feature = "qdrant")]
impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_decode() {
            Self::MalformedResponse {
                url,
                message: err.to_string(),
            }
        } else {
            Self::Unreachable {
                url,
                message: err.to_string(),
            }
        }
    }
}
