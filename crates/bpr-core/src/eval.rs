//! Retrieval evaluation harness.
//!
//! Every query runs the full pipeline independently:
//!
//! ```text
//! embed -> retrieve (k * oversample) -> dedupe -> baseline
//!                                              -> rerank
//!       -> arbiter (labeled queries only) -> metrics
//! ```
//!
//! Queries are spread over a bounded rayon pool so that no more than
//! `maxConcurrency` retrieval calls are in flight. A shared cancellation flag
//! stops queries that have not started yet; finished queries keep their
//! results and the run is still reported.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Local;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::arbiter::Arbiter;
use crate::config::{BprConfig, EmptyQrelPolicy};
use crate::embedding::EmbeddingBackend;
use crate::errors::BprError;
use crate::metrics::{diag_metrics, hitrate_at_k, mrr_at_k, precision_at_k, recall_at_k};
use crate::rank::{stage_rankings, DEBUG_TOPK_LIMIT};
use crate::report::{
    preview, summarize, EvalReport, FinalSection, QueryReport, QueryStatus, RankingSection,
    RunSummary,
};
use crate::rerank::Reranker;
use crate::retriever::{retrieve_k, Retriever};
use crate::types::{ranking_of, QueryRecord, Qrel};

/// Evaluation settings resolved from the configuration.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Cutoff for queries that do not carry their own `k`.
    pub default_k: usize,
    /// Oversample factor actually applied (1 without reranking).
    pub oversample_factor: usize,
    pub empty_qrel_policy: EmptyQrelPolicy,
    pub mrr_epsilon: f64,
    pub diag_ks: Vec<usize>,
    pub worst_n: usize,
    pub preview_len: usize,
    pub max_concurrency: usize,
}

impl EvalOptions {
    pub fn from_config(config: &BprConfig) -> Self {
        Self {
            default_k: config.retrieval.k,
            oversample_factor: config.effective_oversample(),
            empty_qrel_policy: config.eval.empty_qrel_policy,
            mrr_epsilon: config.eval.mrr_epsilon,
            diag_ks: config.eval.diag_ks.clone(),
            worst_n: config.eval.worst_n,
            preview_len: config.eval.preview_len,
            max_concurrency: config.eval.max_concurrency.max(1),
        }
    }
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self::from_config(&BprConfig::default())
    }
}

/// Per-query results plus their aggregate.
#[derive(Debug, Clone)]
pub struct EvalRun {
    pub per_query: Vec<QueryReport>,
    pub summary: RunSummary,
}

impl EvalRun {
    /// Number of queries that were judged and scored.
    pub fn n_labeled(&self) -> usize {
        self.per_query
            .iter()
            .filter(|q| q.status == QueryStatus::Scored)
            .count()
    }
}

/// Callback invoked once per finished query, from worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(&QueryReport) + Sync);

/// Runs queries through the pipeline and scores them.
pub struct Evaluator<'a> {
    retriever: &'a Retriever,
    embedder: &'a dyn EmbeddingBackend,
    reranker: Option<&'a Reranker>,
    arbiter: Arbiter,
    options: EvalOptions,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        retriever: &'a Retriever,
        embedder: &'a dyn EmbeddingBackend,
        reranker: Option<&'a Reranker>,
        options: EvalOptions,
    ) -> Self {
        Self {
            retriever,
            embedder,
            reranker,
            arbiter: Arbiter::new(options.mrr_epsilon),
            options,
        }
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Evaluate one query. Never fails: retrieval problems are recorded on the
    /// returned report.
    pub fn evaluate_query(&self, query: &QueryRecord, qrel: Option<&Qrel>) -> QueryReport {
        let k = query.k.unwrap_or(self.options.default_k).max(1);
        let labeled_qrel = qrel.filter(|q| !q.is_empty());
        let status = match qrel {
            None => {
                debug!("{}", BprError::NoGroundTruth { query_id: query.query_id.clone() });
                QueryStatus::Unlabeled
            }
            Some(q) if q.is_empty() => {
                warn!("{}", BprError::EmptyRelevanceSet { query_id: query.query_id.clone() });
                QueryStatus::EmptyRelevanceSet
            }
            Some(_) => QueryStatus::Scored,
        };

        let mut report = QueryReport::unranked(&query.query_id, &query.text, k, status);
        report.labeled = labeled_qrel.is_some();
        report.apply_rerank = self.reranker.is_some();
        report.retrieve_k = retrieve_k(k, self.options.oversample_factor);
        if let Some(q) = qrel {
            report.relevant_ids = q.relevant_rider_ids.iter().cloned().collect();
        }

        let started = Instant::now();

        let retrieval = self
            .embedder
            .embed(&query.text)
            .and_then(|embedding| {
                self.retriever
                    .retrieve(&embedding, k, self.options.oversample_factor)
            });
        let retrieval = match retrieval {
            Ok(r) => r,
            Err(e) => {
                warn!("Query {} failed: {}", query.query_id, e);
                report.status = QueryStatus::RetrievalFailed;
                report.error = Some(e.to_string());
                report.retrieval_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                report.total_latency_ms = report.retrieval_latency_ms;
                return report;
            }
        };
        report.retrieval_latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let constraints = query.effective_constraints();
        let staged = stage_rankings(retrieval.hits, &constraints, self.reranker);
        let baseline_ids = ranking_of(&staged.baseline, k);
        let reranked_ids = ranking_of(&staged.reranked, k);

        let decision = self
            .arbiter
            .choose(&baseline_ids, &reranked_ids, labeled_qrel, k);

        report.dedupe_in = staged.dedupe_in;
        report.dedupe_out = staged.dedupe_out;
        report.rerank_latency_ms = staged.rerank_latency_ms;
        report.fallback_used = decision.fallback_used;
        report.rerank_regressed = decision.rerank_regressed();

        let relevant = qrel.map(|q| &q.relevant_rider_ids);
        if let (Some(relevant), QueryStatus::Scored | QueryStatus::EmptyRelevanceSet) =
            (relevant, report.status)
        {
            let ranking = &decision.ranking;
            report.hitrate_at_k = Some(hitrate_at_k(ranking, relevant, k));
            report.set_recall_at_k = Some(recall_at_k(ranking, relevant, k));
            report.precision_at_k = Some(precision_at_k(ranking, relevant, k));
            report.mrr_at_k = Some(mrr_at_k(ranking, relevant, k));
            if report.status == QueryStatus::Scored {
                report.diag = Some(diag_metrics(ranking, relevant, &self.options.diag_ks));
            }
        }

        let preview_n = k.min(self.options.preview_len);
        report.baseline = Some(RankingSection {
            retrieved: baseline_ids,
            preview: preview(&staged.baseline, preview_n),
            hitrate_at_k: decision.baseline.map(|m| m.hitrate_at_k),
            mrr_at_k: decision.baseline.map(|m| m.mrr_at_k),
        });
        report.reranked = Some(RankingSection {
            retrieved: reranked_ids,
            preview: preview(&staged.reranked, preview_n),
            hitrate_at_k: decision.reranked.map(|m| m.hitrate_at_k),
            mrr_at_k: decision.reranked.map(|m| m.mrr_at_k),
        });

        if report.rerank_regressed {
            report.rerank_debug_topk = staged
                .debug
                .map(|d| d.into_iter().take(k.min(DEBUG_TOPK_LIMIT)).collect());
        }

        report.final_ranking = FinalSection {
            retrieved: decision.ranking,
            used_fallback: decision.fallback_used,
        };
        report.total_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        report
    }

    /// Placeholder for a query that was never run.
    pub fn cancelled_report(&self, query: &QueryRecord) -> QueryReport {
        QueryReport::unranked(
            &query.query_id,
            &query.text,
            query.k.unwrap_or(self.options.default_k),
            QueryStatus::Cancelled,
        )
    }

    /// Evaluate every query on a bounded worker pool.
    ///
    /// Results keep the order of `queries`. Queries not started when `cancel`
    /// is set are recorded with [`QueryStatus::Cancelled`].
    pub fn run(
        &self,
        queries: &[QueryRecord],
        qrels: &BTreeMap<String, Qrel>,
        cancel: &AtomicBool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<EvalRun, BprError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_concurrency)
            .thread_name(|i| format!("bpr-eval-{}", i))
            .build()
            .map_err(|e| BprError::Other(anyhow::anyhow!("Failed to start worker pool: {}", e)))?;

        info!(
            "Evaluating {} queries ({} judged) with {} workers",
            queries.len(),
            qrels.len(),
            self.options.max_concurrency
        );

        let per_query: Vec<QueryReport> = pool.install(|| {
            queries
                .par_iter()
                .map(|query| {
                    let report = if cancel.load(Ordering::SeqCst) {
                        self.cancelled_report(query)
                    } else {
                        self.evaluate_query(query, qrels.get(&query.query_id))
                    };
                    if let Some(progress) = progress {
                        progress(&report);
                    }
                    report
                })
                .collect()
        });

        let summary = summarize(
            &per_query,
            self.options.empty_qrel_policy,
            self.options.worst_n,
        );

        if summary.cancelled {
            warn!("Run cancelled; {} queries skipped", summary.n_skipped);
        }

        Ok(EvalRun { per_query, summary })
    }

    /// Wrap a finished run into a report.
    pub fn into_report(&self, run: EvalRun, config: &BprConfig) -> EvalReport {
        EvalReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            created_at: Local::now(),
            retriever: self.retriever.name(),
            embedding_model: self.embedder.model_id().to_string(),
            apply_rerank: self.reranker.is_some(),
            empty_qrel_policy: self.options.empty_qrel_policy,
            n_queries: run.per_query.len(),
            n_labeled: run.n_labeled(),
            summary: run.summary,
            config: config.clone(),
            per_query: run.per_query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalHashEmbedder;
    use crate::types::RiderId;
    use bpr_db::vector::{
        VectorId, VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchFilter,
        VectorSearchResult,
    };
    use bpr_db::{DbError, DbResult};
    use serde_json::json;
    use std::sync::Arc;

    /// Returns the same hits for every query; optionally fails.
    struct FixedIndex {
        results: Vec<VectorSearchResult>,
        fail: bool,
    }

    impl VectorIndexBackend for FixedIndex {
        fn name(&self) -> &str {
            "fixed"
        }
        fn query(
            &self,
            _embedding: &[f32],
            limit: usize,
            _filter: Option<&VectorSearchFilter>,
        ) -> DbResult<Vec<VectorSearchResult>> {
            if self.fail {
                return Err(DbError::unreachable("http://localhost:6333", "refused"));
            }
            Ok(self.results.iter().take(limit).cloned().collect())
        }
        fn upsert(&self, _vectors: &[VectorInsert]) -> DbResult<()> {
            Ok(())
        }
        fn delete(&self, _ids: &[VectorId]) -> DbResult<()> {
            Ok(())
        }
        fn flush(&self) -> DbResult<()> {
            Ok(())
        }
        fn len(&self) -> DbResult<usize> {
            Ok(self.results.len())
        }
        fn dimension(&self) -> usize {
            8
        }
        fn metric(&self) -> VectorMetric {
            VectorMetric::Cosine
        }
    }

    fn fixed(fail: bool) -> Retriever {
        let results = vec![
            VectorSearchResult::new(1u64, 0.801, json!({"rider_id": "A", "electronic_shifting": true})),
            VectorSearchResult::new(2u64, 0.800, json!({"rider_id": "B", "electronic_shifting": false})),
            VectorSearchResult::new(3u64, 0.700, json!({"rider_id": "A"})),
            VectorSearchResult::new(4u64, 0.600, json!({"rider_id": "C"})),
        ];
        Retriever::new(Arc::new(FixedIndex { results, fail }))
    }

    fn options(k: usize) -> EvalOptions {
        EvalOptions {
            default_k: k,
            oversample_factor: 5,
            max_concurrency: 2,
            ..EvalOptions::default()
        }
    }

    #[test]
    fn test_fallback_when_rerank_hurts() {
        let retriever = fixed(false);
        let embedder = LocalHashEmbedder::new(8);
        let reranker = Reranker::default();
        let evaluator = Evaluator::new(&retriever, &embedder, Some(&reranker), options(1));

        let query = QueryRecord::new("q1", "mechanical only");
        let qrel = Qrel::new("q1", ["A"]);
        let report = evaluator.evaluate_query(&query, Some(&qrel));

        assert_eq!(report.status, QueryStatus::Scored);
        assert_eq!(report.retrieve_k, 5);
        assert_eq!((report.dedupe_in, report.dedupe_out), (4, 3));
        assert!(report.fallback_used);
        assert!(report.rerank_regressed);
        assert_eq!(report.final_ranking.retrieved, vec![RiderId::new("A")]);
        assert_eq!(report.hitrate_at_k, Some(1.0));
        assert_eq!(report.reranked.as_ref().unwrap().mrr_at_k, Some(0.0));
        assert_eq!(report.rerank_debug_topk.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_rerank_kept_when_it_helps() {
        let retriever = fixed(false);
        let embedder = LocalHashEmbedder::new(8);
        let reranker = Reranker::default();
        let evaluator = Evaluator::new(&retriever, &embedder, Some(&reranker), options(1));

        let report = evaluator.evaluate_query(
            &QueryRecord::new("q1", "mechanical only"),
            Some(&Qrel::new("q1", ["B"])),
        );
        assert!(!report.fallback_used);
        assert_eq!(report.mrr_at_k, Some(1.0));
        assert!(report.rerank_debug_topk.is_none());
    }

    #[test]
    fn test_unlabeled_and_empty_queries() {
        let retriever = fixed(false);
        let embedder = LocalHashEmbedder::new(8);
        let evaluator = Evaluator::new(&retriever, &embedder, None, options(3));

        let unlabeled = evaluator.evaluate_query(&QueryRecord::new("u", "anything"), None);
        assert_eq!(unlabeled.status, QueryStatus::Unlabeled);
        assert!(unlabeled.hitrate_at_k.is_none());
        assert_eq!(unlabeled.final_ranking.retrieved.len(), 3);

        let empty = evaluator.evaluate_query(&QueryRecord::new("e", "anything"), Some(&Qrel::new("e", Vec::<String>::new())));
        assert_eq!(empty.status, QueryStatus::EmptyRelevanceSet);
        assert_eq!(empty.hitrate_at_k, Some(0.0));
        assert_eq!(empty.mrr_at_k, Some(0.0));
        assert!(!empty.labeled);
    }

    #[test]
    fn test_retrieval_failure_does_not_abort_run() {
        let retriever = fixed(true);
        let embedder = LocalHashEmbedder::new(8);
        let evaluator = Evaluator::new(&retriever, &embedder, None, options(3));

        let queries = vec![QueryRecord::new("q1", "a"), QueryRecord::new("q2", "b")];
        let run = evaluator
            .run(&queries, &BTreeMap::new(), &AtomicBool::new(false), None)
            .unwrap();
        assert_eq!(run.per_query.len(), 2);
        assert!(run.per_query.iter().all(|q| q.status == QueryStatus::RetrievalFailed));
        assert_eq!(run.summary.n_failed, 2);
        assert!(run.per_query[0].error.as_deref().unwrap().contains("refused"));
    }

    #[test]
    fn test_cancelled_run_keeps_order_and_reports() {
        let retriever = fixed(false);
        let embedder = LocalHashEmbedder::new(8);
        let evaluator = Evaluator::new(&retriever, &embedder, None, options(3));

        let queries: Vec<_> = (0..5).map(|i| QueryRecord::new(format!("q{}", i), "x")).collect();
        let run = evaluator
            .run(&queries, &BTreeMap::new(), &AtomicBool::new(true), None)
            .unwrap();
        let ids: Vec<_> = run.per_query.iter().map(|q| q.qid.as_str()).collect();
        assert_eq!(ids, vec!["q0", "q1", "q2", "q3", "q4"]);
        assert!(run.summary.cancelled);
        assert_eq!(run.summary.n_skipped, 5);
    }

    #[test]
    fn test_run_summary_and_report() {
        let retriever = fixed(false);
        let embedder = LocalHashEmbedder::new(8);
        let reranker = Reranker::default();
        let evaluator = Evaluator::new(&retriever, &embedder, Some(&reranker), options(1));

        let queries = vec![
            QueryRecord::new("q1", "mechanical only"),
            QueryRecord::new("q2", "mechanical only"),
            QueryRecord::new("q3", "mechanical only"),
        ];
        let mut qrels = BTreeMap::new();
        qrels.insert("q1".to_string(), Qrel::new("q1", ["A"]));
        qrels.insert("q2".to_string(), Qrel::new("q2", ["B"]));

        let seen = std::sync::atomic::AtomicUsize::new(0);
        let progress = |_: &QueryReport| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        let run = evaluator
            .run(&queries, &qrels, &AtomicBool::new(false), Some(&progress))
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(run.summary.hitrate_at_k, 1.0);
        assert_eq!(run.summary.n_fallback, 1);

        let report = evaluator.into_report(run, &BprConfig::default());
        assert_eq!(report.n_queries, 3);
        assert_eq!(report.n_labeled, 2);
        assert_eq!(report.retriever, "dense_fixed");
        assert!(report.apply_rerank);
    }
}
