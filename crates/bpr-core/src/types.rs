//! Common types used throughout bpr.
//!
//! This module contains the data model that flows through one query
//! evaluation: chunk hits from the retriever, deduplicated hits, scored hits
//! from the reranker, and the per-query metric report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constraints::QueryConstraints;

/// Structured payload attached to a chunk (rider_id, text, event_key, ...).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// An ordered list of rider ids, best first, without duplicates.
pub type Ranking = Vec<RiderId>;

// ============================================================================
// RiderId
// ============================================================================

/// A rider identifier.
///
/// Source payloads and label files carry rider ids either as JSON strings or as
/// integers; both normalise to the same textual id so `12` and `"12"` compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiderId(pub String);

impl RiderId {
    /// Create a new rider id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the rider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read a rider id from a JSON value (string or integer).
    ///
    /// Returns `None` for empty strings, floats, and every other JSON type.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
            }
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(Self(u.to_string()))
                } else {
                    n.as_i64().map(|i| Self(i.to_string()))
                }
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RiderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RiderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RiderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Hits
// ============================================================================

/// One chunk returned by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHit {
    /// Chunk identifier (payload `chunk_id`, or the point id).
    pub chunk_id: String,
    /// Rider owning the chunk.
    pub rider_id: RiderId,
    /// Dense similarity, higher is more similar.
    pub dense_score: f64,
    /// Structured payload of the chunk.
    pub payload: Payload,
}

/// The best chunk hit of one rider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupedHit {
    /// Rider id, unique within a result set.
    pub rider_id: RiderId,
    /// Maximum dense score over the rider's chunk hits.
    pub dense_score: f64,
    /// Chunk that carried the winning score.
    pub chunk_id: String,
    /// Payload of the winning chunk.
    pub payload: Payload,
}

impl From<ChunkHit> for DedupedHit {
    fn from(hit: ChunkHit) -> Self {
        Self {
            rider_id: hit.rider_id,
            dense_score: hit.dense_score,
            chunk_id: hit.chunk_id,
            payload: hit.payload,
        }
    }
}

/// A deduplicated hit after reranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredHit {
    pub rider_id: RiderId,
    pub dense_score: f64,
    /// Clamped sum of signal deltas.
    pub boost: f64,
    /// `dense_score + boost`.
    pub final_score: f64,
    pub chunk_id: String,
    pub payload: Payload,
}

impl ScoredHit {
    /// Wrap a deduplicated hit with no boost (baseline ranking).
    pub fn unboosted(hit: &DedupedHit) -> Self {
        Self {
            rider_id: hit.rider_id.clone(),
            dense_score: hit.dense_score,
            boost: 0.0,
            final_score: hit.dense_score,
            chunk_id: hit.chunk_id.clone(),
            payload: hit.payload.clone(),
        }
    }
}

/// Take the rider ids of the first `k` hits.
pub fn ranking_of(hits: &[ScoredHit], k: usize) -> Ranking {
    hits.iter().take(k).map(|h| h.rider_id.clone()).collect()
}

// ============================================================================
// Datasets
// ============================================================================

/// A natural-language evaluation query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Query identifier.
    #[serde(alias = "qid")]
    pub query_id: String,
    /// Query text.
    #[serde(alias = "query")]
    pub text: String,
    /// Per-query cutoff overriding the configured `k`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    /// Explicit constraints; parsed from `text` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<QueryConstraints>,
}

impl QueryRecord {
    /// Create a query with parsed constraints and the default cutoff.
    pub fn new(query_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            text: text.into(),
            k: None,
            constraints: None,
        }
    }

    /// Constraints for this query: the explicit ones, or those parsed from the text.
    pub fn effective_constraints(&self) -> QueryConstraints {
        self.constraints
            .clone()
            .unwrap_or_else(|| crate::constraints::parse_constraints(&self.text))
    }
}

/// Binary relevance judgment for one query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Qrel {
    pub query_id: String,
    pub relevant_rider_ids: BTreeSet<RiderId>,
}

impl Qrel {
    /// Create a judgment from any iterator of rider ids.
    pub fn new<I, R>(query_id: impl Into<String>, relevant: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RiderId>,
    {
        Self {
            query_id: query_id.into(),
            relevant_rider_ids: relevant.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the judgment lists no relevant rider.
    pub fn is_empty(&self) -> bool {
        self.relevant_rider_ids.is_empty()
    }
}

// ============================================================================
// MetricReport
// ============================================================================

/// Per-query outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReport {
    pub query_id: String,
    pub hitrate_at_k: f64,
    pub mrr_at_k: f64,
    pub dedupe_in: usize,
    pub dedupe_out: usize,
    pub retrieval_latency_ms: f64,
    pub rerank_latency_ms: f64,
    pub fallback_used: bool,
}
