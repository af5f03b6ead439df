//! Per-query choice between the baseline and the reranked ranking.

use std::cmp::Ordering;

use crate::config::DEFAULT_MRR_EPSILON;
use crate::metrics::{score, RankingMetrics};
use crate::types::{Qrel, Ranking, RiderId};

/// Lexicographic order over (hitrate@k, MRR@k).
///
/// MRR values closer than `epsilon` compare equal. Hitrates are exact 0/1
/// values and compare exactly.
pub fn compare_metrics(a: &RankingMetrics, b: &RankingMetrics, epsilon: f64) -> Ordering {
    a.hitrate_at_k.total_cmp(&b.hitrate_at_k).then_with(|| {
        if (a.mrr_at_k - b.mrr_at_k).abs() <= epsilon {
            Ordering::Equal
        } else {
            a.mrr_at_k.total_cmp(&b.mrr_at_k)
        }
    })
}

/// Whether the reranked metrics regress against the baseline.
pub fn regresses(reranked: &RankingMetrics, baseline: &RankingMetrics, epsilon: f64) -> bool {
    compare_metrics(reranked, baseline, epsilon) == Ordering::Less
}

/// Outcome of [`Arbiter::choose`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterDecision {
    /// Final ranking, at most `k` riders.
    pub ranking: Ranking,
    pub fallback_used: bool,
    /// Metrics of both candidates; `None` without ground truth.
    pub baseline: Option<RankingMetrics>,
    pub reranked: Option<RankingMetrics>,
}

impl ArbiterDecision {
    /// Whether the reranked ranking scored worse than the baseline.
    pub fn rerank_regressed(&self) -> bool {
        self.fallback_used
    }
}

/// Fallback arbiter.
#[derive(Debug, Clone, Copy)]
pub struct Arbiter {
    epsilon: f64,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(DEFAULT_MRR_EPSILON)
    }
}

impl Arbiter {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.abs(),
        }
    }

    /// Pick the final ranking.
    ///
    /// Without a judgment the reranked ranking is kept and no metrics are
    /// computed. With one, the baseline wins only when the reranked ranking has
    /// a lower hitrate@k, or an equal hitrate@k and a lower MRR@k.
    pub fn choose(
        &self,
        baseline: &[RiderId],
        reranked: &[RiderId],
        qrel: Option<&Qrel>,
        k: usize,
    ) -> ArbiterDecision {
        let truncate = |r: &[RiderId]| -> Ranking { r.iter().take(k).cloned().collect() };

        let Some(qrel) = qrel else {
            return ArbiterDecision {
                ranking: truncate(reranked),
                fallback_used: false,
                baseline: None,
                reranked: None,
            };
        };

        let base_metrics = score(baseline, &qrel.relevant_rider_ids, k);
        let rr_metrics = score(reranked, &qrel.relevant_rider_ids, k);
        let fallback_used = regresses(&rr_metrics, &base_metrics, self.epsilon);

        if fallback_used {
            tracing::debug!(
                "Query {}: rerank regressed ({:?} < {:?}), using baseline",
                qrel.query_id,
                rr_metrics,
                base_metrics
            );
        }

        ArbiterDecision {
            ranking: truncate(if fallback_used { baseline } else { reranked }),
            fallback_used,
            baseline: Some(base_metrics),
            reranked: Some(rr_metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(xs: &[&str]) -> Vec<RiderId> {
        xs.iter().map(|x| RiderId::new(*x)).collect()
    }

    fn m(h: f64, r: f64) -> RankingMetrics {
        RankingMetrics {
            hitrate_at_k: h,
            mrr_at_k: r,
        }
    }

    #[test]
    fn test_comparator_is_lexicographic() {
        assert_eq!(compare_metrics(&m(1.0, 0.1), &m(0.0, 0.0), 1e-12), Ordering::Greater);
        assert_eq!(compare_metrics(&m(1.0, 0.5), &m(1.0, 1.0), 1e-12), Ordering::Less);
        assert_eq!(compare_metrics(&m(1.0, 0.5), &m(1.0, 0.5 + 1e-14), 1e-12), Ordering::Equal);
        assert_eq!(compare_metrics(&m(0.0, 0.0), &m(0.0, 0.0), 0.0), Ordering::Equal);
    }

    #[test]
    fn test_fallback_when_rerank_loses_hit() {
        let qrel = Qrel::new("q1", ["R7"]);
        let baseline = ids(&["a", "b", "c", "R7", "d", "e"]);
        let reranked = ids(&["a", "b", "c", "d", "e", "R7"]);

        let decision = Arbiter::default().choose(&baseline, &reranked, Some(&qrel), 5);
        assert!(decision.fallback_used);
        assert_eq!(decision.ranking, ids(&["a", "b", "c", "R7", "d"]));
        assert_eq!(decision.baseline, Some(m(1.0, 0.25)));
        assert_eq!(decision.reranked, Some(m(0.0, 0.0)));
    }

    #[test]
    fn test_fallback_on_worse_mrr_with_equal_hitrate() {
        let qrel = Qrel::new("q", ["x"]);
        let decision = Arbiter::default().choose(&ids(&["x", "y"]), &ids(&["y", "x"]), Some(&qrel), 2);
        assert!(decision.fallback_used);
        assert_eq!(decision.ranking, ids(&["x", "y"]));
    }

    #[test]
    fn test_keeps_rerank_when_equal_or_better() {
        let qrel = Qrel::new("q", ["x"]);
        let decision = Arbiter::default().choose(&ids(&["y", "x"]), &ids(&["x", "y"]), Some(&qrel), 2);
        assert!(!decision.fallback_used);
        assert_eq!(decision.ranking, ids(&["x", "y"]));

        let decision = Arbiter::default().choose(&ids(&["a", "b"]), &ids(&["b", "a"]), Some(&qrel), 2);
        assert!(!decision.fallback_used);
        assert_eq!(decision.ranking, ids(&["b", "a"]));
    }

    #[test]
    fn test_no_ground_truth_keeps_rerank() {
        let decision = Arbiter::default().choose(&ids(&["a", "b", "c"]), &ids(&["c", "b", "a"]), None, 2);
        assert!(!decision.fallback_used);
        assert_eq!(decision.ranking, ids(&["c", "b"]));
        assert!(decision.baseline.is_none());
    }

    #[test]
    fn test_chosen_never_worse_than_baseline() {
        let pool = ["a", "b", "c", "d"];
        let orders: Vec<Vec<RiderId>> = vec![
            ids(&["a", "b", "c", "d"]),
            ids(&["d", "c", "b", "a"]),
            ids(&["b", "d", "a", "c"]),
            ids(&["c", "a", "d", "b"]),
        ];
        let arbiter = Arbiter::default();
        for rel in pool {
            let qrel = Qrel::new("q", [rel]);
            for base in &orders {
                for rr in &orders {
                    for k in 1..=4 {
                        let d = arbiter.choose(base, rr, Some(&qrel), k);
                        let chosen = score(&d.ranking, &qrel.relevant_rider_ids, k);
                        let baseline = score(base, &qrel.relevant_rider_ids, k);
                        assert_ne!(compare_metrics(&chosen, &baseline, 1e-12), Ordering::Less);
                    }
                }
            }
        }
    }
}
