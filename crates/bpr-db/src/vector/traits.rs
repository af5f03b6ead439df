//! Vector index traits and core types.
//!
//! This module defines the abstraction every chunk store backend implements.

use crate::error::DbResult;
use serde::{Deserialize, Serialize};

use super::metadata::VectorSearchFilter;

// ============================================================================
// VectorId
// ============================================================================

/// Unique identifier for a chunk vector in the index.
///
/// Qdrant only accepts unsigned integers or UUIDs as point ids, so chunk keys
/// are mapped onto a `u64` with [`VectorId::from_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorId(pub u64);

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl VectorId {
    /// Create a new vector ID.
    pub fn new(id: u64) -> Self {
        VectorId(id)
    }

    /// Derive a stable id from a textual chunk key (FNV-1a, 64 bit).
    ///
    /// The same key always maps to the same id across runs and platforms, which
    /// gives re-ingestion upsert semantics.
    pub fn from_key(key: &str) -> Self {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        VectorId(hash)
    }

    /// Get the underlying ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for VectorId {
    fn from(id: u64) -> Self {
        VectorId(id)
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// VectorMetric
// ============================================================================

/// Similarity metric. Scores returned by backends are always "higher is more
/// similar"; L2 is reported as a negated distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorMetric {
    /// Cosine similarity (default).
    #[default]
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean (L2) distance, negated.
    L2,
}

impl VectorMetric {
    /// Get the metric name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorMetric::Cosine => "cosine",
            VectorMetric::Dot => "dot",
            VectorMetric::L2 => "l2",
        }
    }

    /// Parse a metric name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "dot" => Some(Self::Dot),
            "l2" | "euclid" | "euclidean" => Some(Self::L2),
            _ => None,
        }
    }

    /// Qdrant distance name for collection creation.
    pub fn qdrant_distance(&self) -> &'static str {
        match self {
            VectorMetric::Cosine => "Cosine",
            VectorMetric::Dot => "Dot",
            VectorMetric::L2 => "Euclid",
        }
    }
}

impl std::fmt::Display for VectorMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// VectorInsert
// ============================================================================

/// A chunk vector to insert or update in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorInsert {
    /// Point identifier.
    pub id: VectorId,

    /// The embedding vector.
    pub vector: Vec<f32>,

    /// Structured payload (`rider_id`, `chunk_id`, `text`, `event_key`, ...).
    pub payload: serde_json::Value,
}

impl VectorInsert {
    /// Create a new vector insert.
    pub fn new(id: impl Into<VectorId>, vector: Vec<f32>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }
}

// ============================================================================
// VectorSearchResult
// ============================================================================

/// A single result from a vector similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchResult {
    /// Point identifier of the matched chunk.
    pub id: VectorId,

    /// Similarity score, higher is more similar.
    pub score: f32,

    /// Payload stored with the chunk.
    pub payload: serde_json::Value,
}

impl VectorSearchResult {
    /// Create a new search result.
    pub fn new(id: impl Into<VectorId>, score: f32, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            score,
            payload,
        }
    }
}

// ============================================================================
// VectorIndexBackend Trait
// ============================================================================

/// Core trait for chunk store backends.
///
/// ## Implementation Notes
///
/// - Backends are shared across evaluation worker threads, so they must be
///   `Send + Sync` and `query` must be safe to call concurrently.
/// - `query` returns results sorted by score, best first.
/// - Upsert semantics: a vector with an existing id replaces the old one.
/// - Backends never retry; a failed request is returned to the caller.
pub trait VectorIndexBackend: Send + Sync {
    /// Short name used in logs and report file names.
    fn name(&self) -> &str;

    /// Query the index for the `limit` most similar chunks.
    fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&VectorSearchFilter>,
    ) -> DbResult<Vec<VectorSearchResult>>;

    /// Insert or update vectors in the index.
    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()>;

    /// Delete vectors by their IDs.
    fn delete(&self, ids: &[VectorId]) -> DbResult<()>;

    /// Flush pending writes to persistent storage.
    fn flush(&self) -> DbResult<()>;

    /// Get the number of vectors in the index.
    fn len(&self) -> DbResult<usize>;

    /// Check if the index is empty.
    fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Get the dimension of vectors in this index.
    fn dimension(&self) -> usize;

    /// Get the similarity metric used by this index.
    fn metric(&self) -> VectorMetric;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_from_key_is_stable() {
        let a = VectorId::from_key("rider-12:0");
        let b = VectorId::from_key("rider-12:0");
        let c = VectorId::from_key("rider-12:1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // FNV-1a of the empty string is the offset basis
        assert_eq!(VectorId::from_key("").value(), FNV_OFFSET_BASIS);
    }

    #[test]
    fn test_vector_metric() {
        assert_eq!(VectorMetric::Cosine.as_str(), "cosine");
        assert_eq!(VectorMetric::parse("DOT"), Some(VectorMetric::Dot));
        assert_eq!(VectorMetric::parse("euclid"), Some(VectorMetric::L2));
        assert_eq!(VectorMetric::parse("hamming"), None);
        assert_eq!(VectorMetric::default(), VectorMetric::Cosine);
        assert_eq!(VectorMetric::L2.qdrant_distance(), "Euclid");
    }

    #[test]
    fn test_search_result_serialization() {
        let result = VectorSearchResult::new(7u64, 0.5, serde_json::json!({"rider_id": "r1"}));
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"rider_id\":\"r1\""));
    }
}
