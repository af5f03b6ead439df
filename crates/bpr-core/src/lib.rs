//! # bpr-core
//!
//! **Bikepacking retrieval** – evaluation and reranking core library.
//!
//! Natural-language queries about bikepacking setups ("mechanical shifting,
//! 2.1in tyres, steel frame") are answered by dense retrieval over chunks of
//! rider records, one rider per result, optionally nudged by a small clamped
//! reranker. The evaluation harness measures whether the reranker helps and
//! falls back to the plain dense ranking per query when it does not.
//!
//! ## Main Types
//!
//! - [`BprEngine`] – the entry point for search, evaluation and ingestion
//! - [`BprConfig`] – configuration loaded from `~/.bpr/config.yaml`
//! - [`BprError`] – domain-specific error type
//!
//! ## Pipeline
//!
//! ```text
//! query -> embedding -> retriever (k * oversample) -> dedupe per rider
//!       -> baseline ranking
//!       -> reranker (clamped signal boosts)
//!       -> arbiter (labeled queries: keep reranked unless it regresses)
//!       -> metrics -> report
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use bpr_core::{BprConfig, BprEngine};
//!
//! let engine = BprEngine::open(BprConfig::load_default()?)?;
//! let result = engine.search("rigid fork, 700x45 tyres, no electronic shifting", Some(5))?;
//! for hit in &result.hits {
//!     println!("{} {:.4}", hit.rider_id, hit.final_score);
//! }
//! ```

// Modules
pub mod arbiter;
pub mod config;
pub mod constraints;
pub mod dataset;
pub mod db_adapter;
pub mod dedupe;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod eval;
pub mod ingest;
pub mod metrics;
pub mod rank;
pub mod report;
pub mod rerank;
pub mod retriever;
pub mod signals;
pub mod types;

// Re-exports for convenience
pub use arbiter::{compare_metrics, Arbiter, ArbiterDecision};
pub use config::{
    BprConfig, ConfigOverrides, EmbeddingConfig, EmbeddingProvider, EmptyQrelPolicy, EvalConfig,
    IndexConfig, RerankConfig, RetrievalConfig, DEFAULT_CLAMP, DEFAULT_K,
    DEFAULT_OVERSAMPLE_FACTOR,
};
pub use constraints::{parse_constraints, QueryConstraints};
pub use dataset::{build_qrels, load_qrels, load_queries, BuildQrelsSummary, DEFAULT_MIN_REL};
pub use dedupe::{dedupe, DedupeOutcome};
pub use embedding::{create_backend, EmbeddingBackend, LocalHashEmbedder, OllamaEmbedder};
pub use engine::{BprEngine, EvalOutcome, SearchResult};
pub use errors::BprError;
pub use eval::{EvalOptions, EvalRun, Evaluator};
pub use ingest::{ingest_chunks, IngestSummary};
pub use metrics::{diag_metrics, hitrate_at_k, mrr_at_k, RankingMetrics};
pub use rank::{rank_candidates, RankInfo};
pub use report::{
    write_metric_records, write_report, EvalReport, QueryReport, QueryStatus, RunCheckpoint,
    RunSummary,
};
pub use rerank::{RerankDebug, Reranker};
pub use retriever::{retrieve_k, Retriever};
pub use signals::SignalRegistry;
pub use types::{ChunkHit, DedupedHit, MetricReport, QueryRecord, Qrel, RiderId, ScoredHit};
