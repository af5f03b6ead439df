//! Chunk ingestion into the store.
//!
//! Input is JSONL, one chunk per line:
//!
//! ```text
//! {"rider_id": "r-17", "chunk_index": 0, "text": "Salsa Cutthroat, 2.2in tyres...", "event_key": "tdr-2024"}
//! {"chunk_id": "r-18#bags", "rider_id": 18, "text": "...", "vector": [0.01, ...]}
//! ```
//!
//! Every other field is kept as payload for the rerank signals. Rows without a
//! `vector` are embedded in batches with the configured backend. The point id
//! is derived from the chunk id, so re-ingesting a file replaces its chunks.

use std::collections::BTreeSet;
use std::path::Path;

use bpr_db::vector::{
    VectorId, VectorIndexBackend, VectorInsert, FIELD_CHUNK_ID, FIELD_CHUNK_INDEX, FIELD_RIDER_ID,
    FIELD_TEXT,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::read_jsonl;
use crate::db_adapter::IntoBprResult;
use crate::embedding::EmbeddingBackend;
use crate::errors::BprError;
use crate::types::{Payload, RiderId};

/// Payload key holding a precomputed embedding. Stripped before storage.
const FIELD_VECTOR: &str = "vector";

/// Points written per upsert call.
const UPSERT_BATCH: usize = 256;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    /// Chunk rows read.
    pub rows: usize,
    /// Rows embedded by the backend (the rest carried a vector).
    pub embedded: usize,
    /// Points written.
    pub upserted: usize,
    /// Distinct riders among the rows.
    pub riders: usize,
    /// Points in the store after the run.
    pub index_len: usize,
}

#[derive(Debug)]
struct ChunkRow {
    id: VectorId,
    text: String,
    vector: Option<Vec<f32>>,
    payload: Payload,
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect()
}

fn parse_row(path: &Path, line: usize, mut payload: Payload) -> Result<(RiderId, ChunkRow), BprError> {
    let rider_id = payload
        .get(FIELD_RIDER_ID)
        .and_then(RiderId::from_json)
        .ok_or_else(|| BprError::dataset(path, line, "missing or invalid rider_id"))?;

    let text = match payload.get(FIELD_TEXT).and_then(|v| v.as_str()) {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => return Err(BprError::dataset(path, line, "missing or empty text")),
    };

    let vector = match payload.remove(FIELD_VECTOR) {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => Some(
            parse_vector(&value)
                .ok_or_else(|| BprError::dataset(path, line, "vector must be an array of numbers"))?,
        ),
    };

    let chunk_id = match payload.get(FIELD_CHUNK_ID) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => match payload.get(FIELD_CHUNK_INDEX).and_then(|v| v.as_u64()) {
            Some(index) => format!("{}:{}", rider_id, index),
            None => format!("{}:L{}", rider_id, line),
        },
    };
    payload.insert(FIELD_CHUNK_ID.to_string(), serde_json::Value::String(chunk_id.clone()));

    let row = ChunkRow {
        id: VectorId::from_key(&chunk_id),
        text,
        vector,
        payload,
    };
    Ok((rider_id, row))
}

/// Load chunk rows, embed those without vectors, and upsert them.
///
/// # Errors
///
/// - [`BprError::Dataset`] for unreadable rows, rows without `rider_id` or
///   `text`, or a precomputed vector of the wrong dimension
/// - [`BprError::EmbeddingUnavailable`] if the backend fails
/// - storage errors from the index
pub fn ingest_chunks(
    path: &Path,
    index: &dyn VectorIndexBackend,
    embedder: &dyn EmbeddingBackend,
    batch_size: usize,
) -> Result<IngestSummary, BprError> {
    let raw: Vec<(usize, Payload)> = read_jsonl(path)?;
    let dimension = index.dimension();

    let mut riders = BTreeSet::new();
    let mut rows = Vec::with_capacity(raw.len());
    for (line, payload) in raw {
        let (rider_id, row) = parse_row(path, line, payload)?;
        if let Some(vector) = &row.vector {
            if vector.len() != dimension {
                return Err(BprError::dataset(
                    path,
                    line,
                    format!("vector has {} components, index expects {}", vector.len(), dimension),
                ));
            }
        }
        riders.insert(rider_id);
        rows.push(row);
    }
    info!("Read {} chunks for {} riders from {}", rows.len(), riders.len(), path.display());

    let pending: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.vector.is_none())
        .map(|(i, _)| i)
        .collect();

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|&i| rows[i].text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != batch.len() {
            return Err(BprError::EmbeddingUnavailable {
                provider: embedder.provider_kind().to_string(),
                reason: format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            });
        }
        for (&i, vector) in batch.iter().zip(vectors) {
            rows[i].vector = Some(vector);
        }
        debug!("Embedded batch of {}", batch.len());
    }

    let inserts: Vec<VectorInsert> = rows
        .into_iter()
        .map(|row| {
            VectorInsert::new(
                row.id,
                row.vector.unwrap_or_default(),
                serde_json::Value::Object(row.payload),
            )
        })
        .collect();

    for batch in inserts.chunks(UPSERT_BATCH) {
        index.upsert(batch).into_store_result()?;
    }
    index.flush().into_store_result()?;

    let summary = IngestSummary {
        rows: inserts.len(),
        embedded: pending.len(),
        upserted: inserts.len(),
        riders: riders.len(),
        index_len: index.len().into_store_result()?,
    };
    info!(
        "Ingested {} chunks ({} embedded), index now holds {}",
        summary.upserted, summary.embedded, summary.index_len
    );
    Ok(summary)
}
