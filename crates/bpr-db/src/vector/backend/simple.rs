//! File-backed chunk store.
//!
//! The whole store is held in memory and rewritten to `vectors.jsonl` after
//! every mutation; queries are a linear scan. This covers evaluation datasets
//! of a few thousand rider chunks and every test that must run without a
//! Qdrant server.

use super::super::config::{load_index_meta, write_index_meta, VectorIndexConfig, VectorIndexMeta};
use super::super::metadata::VectorSearchFilter;
use super::super::traits::{
    VectorId, VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchResult,
};
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};

const DATA_FILENAME: &str = "vectors.jsonl";
const DATA_TMP_FILENAME: &str = "vectors.jsonl.tmp";

/// One line of `vectors.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkLine {
    id: u64,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

type ChunkMap = BTreeMap<u64, ChunkLine>;

/// Chunk store persisted as JSON lines.
///
/// Points are keyed by id in a `BTreeMap`, so the file layout and the scan
/// order never depend on insertion history.
pub struct SimpleFileVectorIndex {
    dir: PathBuf,
    dimension: usize,
    metric: VectorMetric,
    chunks: RwLock<ChunkMap>,
}

impl SimpleFileVectorIndex {
    /// Open the store in `config.path`, loading `vectors.jsonl` when present.
    ///
    /// Creating the directory and metadata is left to
    /// [`open_vector_index`](super::open_vector_index).
    pub fn open(config: &VectorIndexConfig) -> DbResult<Self> {
        debug!("Opening file chunk store at {}", config.path.display());

        let data_path = config.path.join(DATA_FILENAME);
        let chunks = if data_path.exists() {
            read_chunk_file(&data_path)?
        } else {
            ChunkMap::new()
        };

        Ok(Self {
            dir: config.path.clone(),
            dimension: config.dimension,
            metric: config.metric,
            chunks: RwLock::new(chunks),
        })
    }

    fn read_chunks(&self) -> DbResult<RwLockReadGuard<'_, ChunkMap>> {
        self.chunks
            .read()
            .map_err(|e| DbError::internal(format!("chunk store lock poisoned: {}", e)))
    }

    fn write_chunks(&self) -> DbResult<RwLockWriteGuard<'_, ChunkMap>> {
        self.chunks
            .write()
            .map_err(|e| DbError::internal(format!("chunk store lock poisoned: {}", e)))
    }

    fn check_dimension(&self, len: usize) -> DbResult<()> {
        if len == self.dimension {
            Ok(())
        } else {
            Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            })
        }
    }

    /// Rewrite `vectors.jsonl` through a temp file and bump the metadata count.
    fn persist(&self) -> DbResult<()> {
        let chunks = self.read_chunks()?;
        fs::create_dir_all(&self.dir)?;

        let tmp_path = self.dir.join(DATA_TMP_FILENAME);
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            for chunk in chunks.values() {
                serde_json::to_writer(&mut out, chunk)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        fs::rename(&tmp_path, self.dir.join(DATA_FILENAME))?;

        let mut meta = match load_index_meta(&self.dir) {
            Ok(meta) => meta,
            Err(_) => VectorIndexMeta::new("simple", self.dimension, self.metric),
        };
        meta.update_count(chunks.len());
        write_index_meta(&self.dir, &meta)?;

        trace!("Persisted {} chunks to {}", chunks.len(), self.dir.display());
        Ok(())
    }

    /// Higher is closer for every metric.
    fn score(&self, query: &[f32], stored: &[f32]) -> f32 {
        match self.metric {
            VectorMetric::Cosine => cosine(query, stored),
            VectorMetric::Dot => dot(query, stored),
            VectorMetric::L2 => -l2_distance(query, stored),
        }
    }
}

/// Parse a chunk file. Lines that do not parse are logged and skipped.
fn read_chunk_file(path: &Path) -> DbResult<ChunkMap> {
    let file = File::open(path).map_err(|e| DbError::vector_io(path, e.to_string()))?;
    let mut chunks = ChunkMap::new();
    let mut skipped = 0usize;

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChunkLine>(&line) {
            Ok(chunk) => {
                chunks.insert(chunk.id, chunk);
            }
            Err(e) => {
                skipped += 1;
                warn!("{}:{}: unreadable chunk line skipped ({})", path.display(), idx + 1, e);
            }
        }
    }

    debug!("Loaded {} chunks ({} skipped)", chunks.len(), skipped);
    Ok(chunks)
}

impl VectorIndexBackend for SimpleFileVectorIndex {
    fn name(&self) -> &str {
        "simple"
    }

    fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&VectorSearchFilter>,
    ) -> DbResult<Vec<VectorSearchResult>> {
        self.check_dimension(embedding.len())?;
        let chunks = self.read_chunks()?;

        let mut scored: Vec<(f32, &ChunkLine)> = chunks
            .values()
            .filter(|c| filter.is_none_or(|f| f.matches(&c.payload)))
            .map(|c| (self.score(embedding, &c.vector), c))
            .collect();

        // ties keep id order
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(a.id.cmp(&b.id)));
        scored.truncate(limit);

        trace!("Scanned {} chunks, returning {}", chunks.len(), scored.len());
        Ok(scored
            .into_iter()
            .map(|(score, c)| VectorSearchResult::new(c.id, score, c.payload.clone()))
            .collect())
    }

    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()> {
        for insert in vectors {
            self.check_dimension(insert.vector.len())?;
        }

        {
            let mut chunks = self.write_chunks()?;
            for insert in vectors {
                let id = insert.id.value();
                chunks.insert(
                    id,
                    ChunkLine {
                        id,
                        vector: insert.vector.clone(),
                        payload: insert.payload.clone(),
                    },
                );
            }
        }
        debug!("Upserted {} chunks", vectors.len());
        self.persist()
    }

    fn delete(&self, ids: &[VectorId]) -> DbResult<()> {
        let removed = {
            let mut chunks = self.write_chunks()?;
            ids.iter()
                .filter(|id| chunks.remove(&id.value()).is_some())
                .count()
        };
        debug!("Deleted {} of {} requested chunks", removed, ids.len());
        self.persist()
    }

    fn flush(&self) -> DbResult<()> {
        self.persist()
    }

    fn len(&self) -> DbResult<usize> {
        Ok(self.read_chunks()?.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> VectorMetric {
        self.metric
    }
}

// ============================================================================
// Scoring
// ============================================================================

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Zero vectors score 0 against everything.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot(a, b) / denom
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
