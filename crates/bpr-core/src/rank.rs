//! Ranking stages shared by evaluation and live search.
//!
//! Raw chunk hits are deduplicated per rider, ordered by dense score into the
//! baseline, and optionally reranked. Evaluation keeps both rankings for the
//! arbiter; live search has no ground truth and returns the reranked top k.

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::constraints::QueryConstraints;
use crate::dedupe::dedupe;
use crate::rerank::{RerankDebug, Reranker};
use crate::types::{ChunkHit, ScoredHit};

/// Debug records kept per query, at most.
pub const DEBUG_TOPK_LIMIT: usize = 10;

/// Baseline and reranked orderings of one query's candidates.
#[derive(Debug, Clone)]
pub struct StagedRankings {
    pub dedupe_in: usize,
    pub dedupe_out: usize,
    /// Deduplicated hits by dense score, boost 0.
    pub baseline: Vec<ScoredHit>,
    /// Reranked hits; equal to `baseline` when no reranker is given.
    pub reranked: Vec<ScoredHit>,
    /// Per-hit signal records in reranked order, when a reranker ran.
    pub debug: Option<Vec<RerankDebug>>,
    /// Time spent reranking.
    pub rerank_latency_ms: f64,
}

/// Deduplicate, order, and optionally rerank raw hits.
pub fn stage_rankings(
    hits: Vec<ChunkHit>,
    constraints: &QueryConstraints,
    reranker: Option<&Reranker>,
) -> StagedRankings {
    let deduped = dedupe(hits);
    let baseline: Vec<ScoredHit> = deduped.hits.iter().map(ScoredHit::unboosted).collect();

    let start = Instant::now();
    let (reranked, debug) = match reranker {
        Some(reranker) => {
            let outcome = reranker.rerank(&deduped.hits, constraints);
            (outcome.hits, Some(outcome.debug))
        }
        None => (baseline.clone(), None),
    };
    let rerank_latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    debug!(
        "Staged {} -> {} hits (rerank={}, {:.3}ms)",
        deduped.dedupe_in,
        deduped.dedupe_out,
        reranker.is_some(),
        rerank_latency_ms
    );

    StagedRankings {
        dedupe_in: deduped.dedupe_in,
        dedupe_out: deduped.dedupe_out,
        baseline,
        reranked,
        debug,
        rerank_latency_ms,
    }
}

/// Bookkeeping returned with a live ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankInfo {
    pub k: usize,
    pub oversample: usize,
    pub dedupe_in: usize,
    pub dedupe_out: usize,
    pub applied_rerank: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_debug_topk: Option<Vec<RerankDebug>>,
}

/// Rank raw (oversampled) hits for a query without ground truth.
///
/// Returns at most `k` hits. Constraints come from the query text.
pub fn rank_candidates(
    query: &str,
    hits: Vec<ChunkHit>,
    k: usize,
    oversample: usize,
    reranker: Option<&Reranker>,
) -> (Vec<ScoredHit>, RankInfo) {
    let constraints = crate::constraints::parse_constraints(query);
    let staged = stage_rankings(hits, &constraints, reranker);

    let mut final_hits = staged.reranked;
    final_hits.truncate(k);

    let info = RankInfo {
        k,
        oversample,
        dedupe_in: staged.dedupe_in,
        dedupe_out: staged.dedupe_out,
        applied_rerank: reranker.is_some(),
        rerank_debug_topk: staged
            .debug
            .map(|d| d.into_iter().take(k.min(DEBUG_TOPK_LIMIT)).collect()),
    };

    (final_hits, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, RiderId};
    use serde_json::json;

    fn chunk(id: &str, rider: &str, score: f64, payload: serde_json::Value) -> ChunkHit {
        ChunkHit {
            chunk_id: id.to_string(),
            rider_id: RiderId::new(rider),
            dense_score: score,
            payload: payload.as_object().cloned().unwrap_or_else(Payload::new),
        }
    }

    fn sample() -> Vec<ChunkHit> {
        vec![
            chunk("c1", "A", 0.801, json!({"electronic_shifting": true})),
            chunk("c2", "B", 0.800, json!({"electronic_shifting": false})),
            chunk("c3", "A", 0.500, json!({})),
            chunk("c4", "C", 0.400, json!({})),
        ]
    }

    #[test]
    fn test_stage_without_reranker() {
        let staged = stage_rankings(sample(), &QueryConstraints::default(), None);
        assert_eq!((staged.dedupe_in, staged.dedupe_out), (4, 3));
        assert_eq!(staged.baseline, staged.reranked);
        assert!(staged.debug.is_none());
        assert!(staged.baseline.iter().all(|h| h.boost == 0.0));
    }

    #[test]
    fn test_rank_candidates_reranks_and_truncates() {
        let reranker = Reranker::default();
        let (hits, info) = rank_candidates("mechanical only please", sample(), 2, 5, Some(&reranker));

        let riders: Vec<_> = hits.iter().map(|h| h.rider_id.as_str()).collect();
        assert_eq!(riders, vec!["B", "A"]);
        assert!(info.applied_rerank);
        assert_eq!(info.dedupe_in, 4);
        assert_eq!(info.dedupe_out, 3);
        assert_eq!(info.rerank_debug_topk.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_rank_candidates_baseline_only() {
        let (hits, info) = rank_candidates("mechanical only", sample(), 10, 1, None);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].rider_id.as_str(), "A");
        assert!(!info.applied_rerank);
        assert!(info.rerank_debug_topk.is_none());
    }
}
