//! Collapse chunk hits to one hit per rider.

use std::collections::HashMap;

use crate::types::{ChunkHit, DedupedHit, RiderId};

/// Deduplicated hits plus the counts seen on the way in and out.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupeOutcome {
    pub hits: Vec<DedupedHit>,
    /// Number of chunk hits given to [`dedupe`].
    pub dedupe_in: usize,
    /// Number of distinct riders.
    pub dedupe_out: usize,
}

/// Keep the best-scoring chunk of each rider.
///
/// Ties between chunks of the same rider go to the one that appears first in
/// the input. The output is sorted by dense score descending, ties by rider id
/// ascending, regardless of input order.
pub fn dedupe(hits: Vec<ChunkHit>) -> DedupeOutcome {
    let dedupe_in = hits.len();
    let mut best: HashMap<RiderId, ChunkHit> = HashMap::with_capacity(hits.len());

    for hit in hits {
        match best.get(&hit.rider_id) {
            Some(prev) if hit.dense_score <= prev.dense_score => {}
            _ => {
                best.insert(hit.rider_id.clone(), hit);
            }
        }
    }

    let mut deduped: Vec<DedupedHit> = best.into_values().map(DedupedHit::from).collect();
    sort_by_dense(&mut deduped);

    DedupeOutcome {
        dedupe_out: deduped.len(),
        dedupe_in,
        hits: deduped,
    }
}

/// Sort by dense score descending, ties by rider id ascending.
///
/// This is the baseline ranking order.
pub fn sort_by_dense(hits: &mut [DedupedHit]) {
    hits.sort_by(|a, b| {
        b.dense_score
            .total_cmp(&a.dense_score)
            .then_with(|| a.rider_id.cmp(&b.rider_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    fn hit(chunk: &str, rider: &str, score: f64) -> ChunkHit {
        let mut payload = Payload::new();
        payload.insert("chunk".to_string(), chunk.into());
        ChunkHit {
            chunk_id: chunk.to_string(),
            rider_id: RiderId::new(rider),
            dense_score: score,
            payload,
        }
    }

    #[test]
    fn test_keeps_best_score_per_rider() {
        let out = dedupe(vec![hit("c1", "A", 0.90), hit("c2", "B", 0.85), hit("c3", "A", 0.70)]);
        assert_eq!(out.dedupe_in, 3);
        assert_eq!(out.dedupe_out, 2);
        let riders: Vec<_> = out.hits.iter().map(|h| h.rider_id.as_str()).collect();
        assert_eq!(riders, vec!["A", "B"]);
        assert_eq!(out.hits[0].dense_score, 0.90);
        assert_eq!(out.hits[0].chunk_id, "c1");
    }

    #[test]
    fn test_later_better_chunk_wins() {
        let out = dedupe(vec![hit("c1", "A", 0.50), hit("c2", "A", 0.80)]);
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits[0].chunk_id, "c2");
        assert_eq!(out.hits[0].payload.get("chunk").unwrap(), "c2");
    }

    #[test]
    fn test_equal_scores_keep_first_chunk() {
        let out = dedupe(vec![hit("first", "A", 0.6), hit("second", "A", 0.6)]);
        assert_eq!(out.hits[0].chunk_id, "first");
    }

    #[test]
    fn test_output_sorted_regardless_of_input_order() {
        let out = dedupe(vec![hit("c1", "C", 0.1), hit("c2", "B", 0.5), hit("c3", "A", 0.5)]);
        let riders: Vec<_> = out.hits.iter().map(|h| h.rider_id.as_str()).collect();
        assert_eq!(riders, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_unique_input_keeps_length() {
        let out = dedupe(vec![hit("c1", "A", 0.3), hit("c2", "B", 0.2)]);
        assert_eq!(out.dedupe_in, out.dedupe_out);

        let empty = dedupe(Vec::new());
        assert_eq!((empty.dedupe_in, empty.dedupe_out), (0, 0));
    }
}
