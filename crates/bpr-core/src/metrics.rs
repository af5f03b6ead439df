//! Binary-relevance ranking metrics.
//!
//! Every metric truncates the ranking to its first `k` entries. Rankings
//! shorter than `k` are scored as they are.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::RiderId;

/// hitrate@k and MRR@k of one ranking.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingMetrics {
    pub hitrate_at_k: f64,
    pub mrr_at_k: f64,
}

fn top_k(ranking: &[RiderId], k: usize) -> &[RiderId] {
    &ranking[..ranking.len().min(k)]
}

fn hits_in_top_k(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> usize {
    top_k(ranking, k)
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|id| relevant.contains(*id))
        .count()
}

/// 1.0 if any relevant rider is in the top `k`, else 0.0.
pub fn hitrate_at_k(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> f64 {
    if top_k(ranking, k).iter().any(|id| relevant.contains(id)) {
        1.0
    } else {
        0.0
    }
}

/// Reciprocal 1-based rank of the first relevant rider in the top `k`, else 0.0.
pub fn mrr_at_k(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> f64 {
    top_k(ranking, k)
        .iter()
        .position(|id| relevant.contains(id))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

/// Set recall: `|relevant ∩ top k| / |relevant|`; 0.0 for an empty relevant set.
pub fn recall_at_k(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top_k(ranking, relevant, k) as f64 / relevant.len() as f64
}

/// `|relevant ∩ top k| / k`. The denominator is `k` even for shorter rankings.
pub fn precision_at_k(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top_k(ranking, relevant, k) as f64 / k as f64
}

/// Average precision over the top `k`, normalised by the number of relevant riders.
pub fn average_precision_at_k(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let mut found = 0usize;
    let mut sum = 0.0;
    for (i, id) in top_k(ranking, k).iter().enumerate() {
        if relevant.contains(id) {
            found += 1;
            sum += found as f64 / (i + 1) as f64;
        }
    }
    sum / relevant.len() as f64
}

/// Score a ranking against a relevance set.
pub fn score(ranking: &[RiderId], relevant: &BTreeSet<RiderId>, k: usize) -> RankingMetrics {
    RankingMetrics {
        hitrate_at_k: hitrate_at_k(ranking, relevant, k),
        mrr_at_k: mrr_at_k(ranking, relevant, k),
    }
}

/// Diagnostic metrics at several cutoffs, keyed `hitrate@n`, `recall@n`,
/// `precision@n` and `mrr@n`.
pub fn diag_metrics(
    ranking: &[RiderId],
    relevant: &BTreeSet<RiderId>,
    ks: &[usize],
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for &n in ks {
        out.insert(format!("hitrate@{}", n), hitrate_at_k(ranking, relevant, n));
        out.insert(format!("recall@{}", n), recall_at_k(ranking, relevant, n));
        out.insert(format!("precision@{}", n), precision_at_k(ranking, relevant, n));
        out.insert(format!("mrr@{}", n), mrr_at_k(ranking, relevant, n));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(xs: &[&str]) -> Vec<RiderId> {
        xs.iter().map(|x| RiderId::new(*x)).collect()
    }

    fn set(xs: &[&str]) -> BTreeSet<RiderId> {
        xs.iter().map(|x| RiderId::new(*x)).collect()
    }

    #[test]
    fn test_first_relevant_rank() {
        let ranking = ids(&["a", "b", "c", "R7", "d"]);
        let m = score(&ranking, &set(&["R7"]), 5);
        assert_eq!(m.hitrate_at_k, 1.0);
        assert_eq!(m.mrr_at_k, 0.25);

        let m = score(&ranking, &set(&["R7"]), 3);
        assert_eq!(m, RankingMetrics::default());
    }

    #[test]
    fn test_empty_relevant_set_scores_zero() {
        let ranking = ids(&["X", "Y", "Z"]);
        let empty = BTreeSet::new();
        assert_eq!(score(&ranking, &empty, 3), RankingMetrics::default());
        assert_eq!(recall_at_k(&ranking, &empty, 3), 0.0);
        assert_eq!(average_precision_at_k(&ranking, &empty, 3), 0.0);
    }

    #[test]
    fn test_short_ranking() {
        let ranking = ids(&["a", "b"]);
        let relevant = set(&["b", "z"]);
        assert_eq!(mrr_at_k(&ranking, &relevant, 10), 0.5);
        assert_eq!(recall_at_k(&ranking, &relevant, 10), 0.5);
        assert_eq!(precision_at_k(&ranking, &relevant, 10), 0.1);
    }

    #[test]
    fn test_average_precision() {
        let ranking = ids(&["a", "x", "b", "y"]);
        let relevant = set(&["a", "b"]);
        // (1/1 + 2/3) / 2
        let ap = average_precision_at_k(&ranking, &relevant, 4);
        assert!((ap - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_mrr_implies_hit() {
        let ranking = ids(&["a", "b", "c", "d"]);
        for target in ["a", "b", "c", "d", "zz"] {
            for k in 1..=5 {
                let m = score(&ranking, &set(&[target]), k);
                assert!(m.hitrate_at_k == 0.0 || m.hitrate_at_k == 1.0);
                if m.mrr_at_k > 0.0 {
                    assert_eq!(m.hitrate_at_k, 1.0);
                    let rank = 1.0 / m.mrr_at_k;
                    assert_eq!(rank, rank.round());
                }
            }
        }
    }

    #[test]
    fn test_diag_metrics_keys() {
        let diag = diag_metrics(&ids(&["a", "b", "c"]), &set(&["c"]), &[1, 3]);
        assert_eq!(diag.len(), 8);
        assert_eq!(diag["hitrate@1"], 0.0);
        assert_eq!(diag["hitrate@3"], 1.0);
        assert!((diag["mrr@3"] - 1.0 / 3.0).abs() < 1e-12);
        assert!((diag["precision@3"] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(diag["recall@3"], 1.0);
    }
}
