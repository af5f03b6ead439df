//! The main BprEngine implementation.
//!
//! The engine owns one configuration and the components built from it: the
//! chunk store, the embedding backend, the retriever and (when enabled) the
//! reranker. The CLI and tests drive every operation through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use bpr_db::vector::{VectorIndexBackend, VectorSearchFilter};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::BprConfig;
use crate::constraints::{parse_constraints, QueryConstraints};
use crate::dataset::{load_qrels, load_queries};
use crate::db_adapter::open_index;
use crate::embedding::{create_backend, EmbeddingBackend};
use crate::errors::BprError;
use crate::eval::{EvalOptions, EvalRun, Evaluator, ProgressFn};
use crate::ingest::{ingest_chunks, IngestSummary};
use crate::rank::{rank_candidates, RankInfo};
use crate::report::{summarize, write_report, EvalReport, QueryReport, RunCheckpoint};
use crate::rerank::Reranker;
use crate::retriever::Retriever;
use crate::types::{QueryRecord, Qrel, ScoredHit};

/// Result of a live search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub query: String,
    pub retriever: String,
    pub constraints: QueryConstraints,
    pub hits: Vec<ScoredHit>,
    pub info: RankInfo,
    /// Embedding plus index time.
    pub retrieval_latency_ms: f64,
}

/// An evaluation report and where it was written.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub report: EvalReport,
    pub path: PathBuf,
}

/// Entry point for retrieval, ranking, evaluation, and ingestion.
pub struct BprEngine {
    config: BprConfig,
    index: Arc<dyn VectorIndexBackend>,
    embedder: Box<dyn EmbeddingBackend>,
    retriever: Retriever,
    reranker: Option<Reranker>,
}

impl std::fmt::Debug for BprEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BprEngine")
            .field("index", &self.index.name())
            .field("embedding_model", &self.embedder.model_id())
            .field("retriever", &self.retriever)
            .field("rerank", &self.reranker.is_some())
            .finish()
    }
}

impl BprEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Open an existing index for search and evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`BprError::InvalidConfiguration`] if the index does not exist
    /// or its dimension differs from the embedding model's.
    pub fn open(config: BprConfig) -> Result<Self, BprError> {
        let index = open_index(&config.index, false)?;
        let embedder = create_backend(&config.embedding)?;
        Self::with_parts(config, index, embedder)
    }

    /// Open the index for writing, creating it if needed.
    pub fn open_for_ingest(config: BprConfig) -> Result<Self, BprError> {
        let index = open_index(&config.index, true)?;
        let embedder = create_backend(&config.embedding)?;
        Self::with_parts(config, index, embedder)
    }

    /// Assemble an engine from already-built components.
    pub fn with_parts(
        config: BprConfig,
        index: Arc<dyn VectorIndexBackend>,
        embedder: Box<dyn EmbeddingBackend>,
    ) -> Result<Self, BprError> {
        if embedder.dimension() != index.dimension() {
            return Err(BprError::invalid_config(
                format!(
                    "Embedding model {} produces {} dimensions but the index stores {}",
                    embedder.model_id(),
                    embedder.dimension(),
                    index.dimension()
                ),
                "Make embedding.dimension match index.dimension",
            ));
        }

        let filter = match &config.retrieval.event_key {
            Some(event_key) => VectorSearchFilter::new().with_event_key(event_key),
            None => VectorSearchFilter::new(),
        };
        let retriever = Retriever::new(Arc::clone(&index)).with_filter(filter);
        let reranker = config
            .rerank
            .enabled
            .then(|| Reranker::from_config(&config.rerank));

        debug!(
            "Engine ready: {} index, {} embeddings, rerank={}",
            index.name(),
            embedder.model_id(),
            reranker.is_some()
        );

        Ok(Self {
            config,
            index,
            embedder,
            retriever,
            reranker,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &BprConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn embedder(&self) -> &dyn EmbeddingBackend {
        self.embedder.as_ref()
    }

    pub fn reranker(&self) -> Option<&Reranker> {
        self.reranker.as_ref()
    }

    /// Number of chunks in the store.
    pub fn index_len(&self) -> Result<usize, BprError> {
        use crate::db_adapter::IntoBprResult;
        self.index.len().into_store_result()
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Constraints the reranker would derive from a query.
    pub fn constraints(&self, query: &str) -> QueryConstraints {
        parse_constraints(query)
    }

    /// Rank riders for a query without ground truth.
    ///
    /// `k` defaults to `retrieval.k`. Returns at most `k` riders.
    pub fn search(&self, query: &str, k: Option<usize>) -> Result<SearchResult, BprError> {
        let k = k.unwrap_or(self.config.retrieval.k);
        if k == 0 {
            return Err(BprError::InvalidArgument("k must be at least 1".to_string()));
        }
        let oversample = self.config.effective_oversample();

        let start = Instant::now();
        let embedding = self.embedder.embed(query)?;
        let output = self.retriever.retrieve(&embedding, k, oversample)?;
        let retrieval_latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (hits, info) = rank_candidates(query, output.hits, k, oversample, self.reranker.as_ref());
        info!("Search returned {} riders in {:.1}ms", hits.len(), retrieval_latency_ms);

        Ok(SearchResult {
            query: query.to_string(),
            retriever: self.retriever.name(),
            constraints: parse_constraints(query),
            hits,
            info,
            retrieval_latency_ms,
        })
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(
            &self.retriever,
            self.embedder.as_ref(),
            self.reranker.as_ref(),
            EvalOptions::from_config(&self.config),
        )
    }

    /// Evaluate in-memory queries and judgments. Nothing is written.
    pub fn evaluate(
        &self,
        queries: &[QueryRecord],
        qrels: &BTreeMap<String, Qrel>,
        cancel: &AtomicBool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<EvalReport, BprError> {
        let evaluator = self.evaluator();
        let run = evaluator.run(queries, qrels, cancel, progress)?;
        Ok(evaluator.into_report(run, &self.config))
    }

    /// Load queries (and judgments, if given), evaluate, and write the report.
    ///
    /// The report goes to `report_dir`, or `eval.reportDir` when `None`. A
    /// cancelled run is still written. With a `checkpoint`, finished queries
    /// are tracked there until the report is on disk, so the caller can write
    /// a partial report if it has to stop before that.
    pub fn evaluate_files(
        &self,
        queries_path: &Path,
        qrels_path: Option<&Path>,
        report_dir: Option<&Path>,
        cancel: &AtomicBool,
        progress: Option<ProgressFn<'_>>,
        checkpoint: Option<&RunCheckpoint>,
    ) -> Result<EvalOutcome, BprError> {
        let queries = load_queries(queries_path)?;
        let qrels = match qrels_path {
            Some(path) => load_qrels(path)?,
            None => BTreeMap::new(),
        };
        let dir = report_dir.unwrap_or(&self.config.eval.report_dir);
        let evaluator = self.evaluator();

        if let Some(checkpoint) = checkpoint {
            let per_query: Vec<QueryReport> =
                queries.iter().map(|q| evaluator.cancelled_report(q)).collect();
            let options = evaluator.options();
            let summary = summarize(&per_query, options.empty_qrel_policy, options.worst_n);
            let pending = evaluator.into_report(EvalRun { per_query, summary }, &self.config);
            checkpoint.begin(pending, dir.to_path_buf());
        }

        let on_query = |report: &QueryReport| {
            if let Some(checkpoint) = checkpoint {
                checkpoint.record(report);
            }
            if let Some(progress) = progress {
                progress(report);
            }
        };
        let run = evaluator.run(&queries, &qrels, cancel, Some(&on_query));
        let written = run.and_then(|run| {
            let report = evaluator.into_report(run, &self.config);
            let path = write_report(&report, dir)?;
            Ok(EvalOutcome { report, path })
        });

        if let Some(checkpoint) = checkpoint {
            checkpoint.clear();
        }
        written
    }

    /// Ingest a chunk JSONL file into the store.
    pub fn ingest(&self, chunks_path: &Path) -> Result<IngestSummary, BprError> {
        ingest_chunks(
            chunks_path,
            self.index.as_ref(),
            self.embedder.as_ref(),
            self.config.embedding.batch_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::LocalHashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, dimension: usize) -> BprConfig {
        let mut config = BprConfig::default();
        config.index.path = dir.path().join("index");
        config.index.dimension = dimension;
        config.embedding = EmbeddingConfig {
            dimension,
            ..Default::default()
        };
        config.eval.report_dir = dir.path().join("reports");
        config.eval.max_concurrency = 2;
        config
    }

    fn write_chunks(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("chunks.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"rider_id": "ana", "chunk_index": 0, "text": "steel frame with dynamo hub and rohloff", "event_key": "tdr"}"#, "\n",
                r#"{"rider_id": "ana", "chunk_index": 1, "text": "frame bag and seat pack", "event_key": "tdr"}"#, "\n",
                r#"{"rider_id": "ben", "chunk_index": 0, "text": "carbon gravel bike with electronic shifting", "event_key": "tcr"}"#, "\n",
                r#"{"rider_id": "cam", "chunk_index": 0, "text": "titanium hardtail with suspension fork", "event_key": "tdr"}"#, "\n",
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_open_without_index_fails() {
        let dir = TempDir::new().unwrap();
        let err = BprEngine::open(config_in(&dir, 64)).unwrap_err();
        assert!(matches!(err, BprError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, 64);
        let index = open_index(&config.index, true).unwrap();
        let err = BprEngine::with_parts(config, index, Box::new(LocalHashEmbedder::new(32))).unwrap_err();
        assert!(err.to_string().contains("32 dimensions"));
    }

    #[test]
    fn test_ingest_then_search() {
        let dir = TempDir::new().unwrap();
        let chunks = write_chunks(&dir);

        let engine = BprEngine::open_for_ingest(config_in(&dir, 128)).unwrap();
        let summary = engine.ingest(&chunks).unwrap();
        assert_eq!(summary.riders, 3);

        let engine = BprEngine::open(config_in(&dir, 128)).unwrap();
        assert_eq!(engine.index_len().unwrap(), 4);

        let result = engine.search("steel frame dynamo", Some(2)).unwrap();
        assert!(result.hits.len() <= 2);
        assert_eq!(result.hits[0].rider_id.as_str(), "ana");
        assert!(result.info.applied_rerank);
        assert_eq!(result.retriever, "dense_simple");

        let riders: Vec<_> = result.hits.iter().map(|h| h.rider_id.clone()).collect();
        let unique: std::collections::BTreeSet<_> = riders.iter().collect();
        assert_eq!(unique.len(), riders.len());
    }

    #[test]
    fn test_event_key_filter() {
        let dir = TempDir::new().unwrap();
        let chunks = write_chunks(&dir);
        BprEngine::open_for_ingest(config_in(&dir, 128))
            .unwrap()
            .ingest(&chunks)
            .unwrap();

        let mut config = config_in(&dir, 128);
        config.retrieval.event_key = Some("tcr".to_string());
        let engine = BprEngine::open(config).unwrap();
        let result = engine.search("steel frame dynamo", Some(5)).unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].rider_id.as_str(), "ben");
    }

    #[test]
    fn test_search_rejects_zero_k() {
        let dir = TempDir::new().unwrap();
        let engine = BprEngine::open_for_ingest(config_in(&dir, 16)).unwrap();
        assert!(matches!(
            engine.search("anything", Some(0)),
            Err(BprError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_evaluate_files_writes_report() {
        let dir = TempDir::new().unwrap();
        let chunks = write_chunks(&dir);
        let engine = BprEngine::open_for_ingest(config_in(&dir, 128)).unwrap();
        engine.ingest(&chunks).unwrap();

        let queries = dir.path().join("queries.jsonl");
        fs::write(
            &queries,
            concat!(
                r#"{"query_id": "q1", "text": "steel frame dynamo rohloff"}"#, "\n",
                r#"{"query_id": "q2", "text": "titanium suspension", "k": 2}"#, "\n",
                r#"{"query_id": "q3", "text": "anything"}"#, "\n",
            ),
        )
        .unwrap();
        let qrels = dir.path().join("qrels.jsonl");
        fs::write(
            &qrels,
            concat!(
                r#"{"qid": "q1", "relevant_ids": ["ana"]}"#, "\n",
                r#"{"qid": "q2", "relevant_ids": ["cam"]}"#, "\n",
            ),
        )
        .unwrap();

        let cancel = AtomicBool::new(false);
        let outcome = engine
            .evaluate_files(&queries, Some(&qrels), None, &cancel, None, None)
            .unwrap();

        assert!(outcome.path.starts_with(dir.path().join("reports")));
        assert!(outcome.path.exists());
        assert_eq!(outcome.report.n_queries, 3);
        assert_eq!(outcome.report.n_labeled, 2);
        assert_eq!(outcome.report.per_query[2].qid, "q3");

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&outcome.path).unwrap()).unwrap();
        assert_eq!(written["nQueries"], 3);
        assert!(written["perQuery"][0]["final"].is_object());
    }

    #[test]
    fn test_checkpoint_tracks_finished_queries_until_written() {
        use crate::report::QueryStatus;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = TempDir::new().unwrap();
        let chunks = write_chunks(&dir);
        let engine = BprEngine::open_for_ingest(config_in(&dir, 128)).unwrap();
        engine.ingest(&chunks).unwrap();

        let queries = dir.path().join("queries.jsonl");
        fs::write(
            &queries,
            concat!(
                r#"{"query_id": "q1", "text": "steel frame"}"#, "\n",
                r#"{"query_id": "q2", "text": "suspension fork"}"#, "\n",
            ),
        )
        .unwrap();

        let checkpoint = RunCheckpoint::new();
        let most_finished = AtomicUsize::new(0);
        let on_query = |_: &QueryReport| {
            let partial = checkpoint.snapshot().unwrap();
            assert_eq!(partial.n_queries, 2);
            let finished = partial
                .per_query
                .iter()
                .filter(|q| q.status != QueryStatus::Cancelled)
                .count();
            most_finished.fetch_max(finished, Ordering::SeqCst);
        };

        let cancel = AtomicBool::new(false);
        let outcome = engine
            .evaluate_files(&queries, None, None, &cancel, Some(&on_query), Some(&checkpoint))
            .unwrap();

        assert!(most_finished.load(Ordering::SeqCst) >= 1);
        assert!(!checkpoint.is_active());
        assert!(outcome.path.exists());
        assert_eq!(outcome.report.n_queries, 2);
    }
}
