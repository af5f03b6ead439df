//! Dense retrieval against the chunk store.
//!
//! The retriever is the only pipeline stage that performs I/O. It asks the
//! index for `k * oversample` neighbours, converts them into [`ChunkHit`]s and
//! measures its own wall-clock latency. Failures are never retried here.

use std::sync::Arc;
use std::time::Instant;

use bpr_db::vector::{
    VectorIndexBackend, VectorSearchFilter, VectorSearchResult, FIELD_CHUNK_ID, FIELD_RIDER_ID,
};
use tracing::{debug, trace};

use crate::db_adapter::IntoBprResult;
use crate::errors::BprError;
use crate::types::{ChunkHit, Payload, RiderId};

/// Number of neighbours to request for a cutoff and oversample factor.
///
/// Never less than `k`; a factor of 0 is treated as 1.
pub fn retrieve_k(k: usize, oversample_factor: usize) -> usize {
    k.max(k.saturating_mul(oversample_factor.max(1)))
}

/// Hits returned by one retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalOutput {
    /// Chunk hits, best first, ties by chunk id ascending.
    pub hits: Vec<ChunkHit>,
    /// Number of neighbours requested from the index.
    pub requested: usize,
    /// Wall-clock time spent in the index call and conversion.
    pub latency_ms: f64,
}

/// Dense retriever over a shared chunk store.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndexBackend>,
    filter: Option<VectorSearchFilter>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("index", &self.index.name())
            .field("filter", &self.filter)
            .finish()
    }
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndexBackend>) -> Self {
        Self {
            index,
            filter: None,
        }
    }

    /// Restrict every query with a payload filter. Empty filters are dropped.
    pub fn with_filter(mut self, filter: VectorSearchFilter) -> Self {
        self.filter = (!filter.is_empty()).then_some(filter);
        self
    }

    /// Name used in report file names, e.g. `dense_qdrant`.
    pub fn name(&self) -> String {
        format!("dense_{}", self.index.name())
    }

    /// Dimension the index expects for query embeddings.
    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Fetch up to `k * oversample_factor` chunk hits for a query embedding.
    ///
    /// # Errors
    ///
    /// - [`BprError::InvalidArgument`] if `k` is 0
    /// - [`BprError::RetrievalUnavailable`] if the index call fails or a hit
    ///   has no usable `rider_id` or a non-finite score
    pub fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
        oversample_factor: usize,
    ) -> Result<RetrievalOutput, BprError> {
        if k == 0 {
            return Err(BprError::InvalidArgument("k must be at least 1".to_string()));
        }

        let requested = retrieve_k(k, oversample_factor);
        let start = Instant::now();

        let results = self
            .index
            .query(query_embedding, requested, self.filter.as_ref())
            .into_retrieval_result()?;
        trace!("Index returned {} results for limit {}", results.len(), requested);

        let mut hits = results
            .into_iter()
            .map(to_chunk_hit)
            .collect::<Result<Vec<_>, _>>()?;

        hits.sort_by(|a, b| {
            b.dense_score
                .total_cmp(&a.dense_score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Retrieved {} hits (requested {}) in {:.2}ms",
            hits.len(),
            requested,
            latency_ms
        );

        Ok(RetrievalOutput {
            hits,
            requested,
            latency_ms,
        })
    }
}

/// Convert an index result into a chunk hit.
fn to_chunk_hit(result: VectorSearchResult) -> Result<ChunkHit, BprError> {
    let payload: Payload = match result.payload {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => Payload::new(),
        other => {
            return Err(BprError::retrieval_unavailable(format!(
                "point {} has a non-object payload: {}",
                result.id, other
            )))
        }
    };

    let rider_id = payload
        .get(FIELD_RIDER_ID)
        .and_then(RiderId::from_json)
        .ok_or_else(|| {
            BprError::retrieval_unavailable(format!(
                "payload of point {} is missing `{}`",
                result.id, FIELD_RIDER_ID
            ))
        })?;

    if !result.score.is_finite() {
        return Err(BprError::retrieval_unavailable(format!(
            "point {} has a non-finite score",
            result.id
        )));
    }

    let chunk_id = match payload.get(FIELD_CHUNK_ID) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => result.id.to_string(),
    };

    Ok(ChunkHit {
        chunk_id,
        rider_id,
        dense_score: f64::from(result.score),
        payload,
    })
}
