//! Deterministic, clamped reranking.
//!
//! Each hit's signal deltas are summed and clamped to `[-B, +B]`. The clamped
//! sums of one candidate set are then shifted so the lowest becomes zero and
//! capped at `B`, giving every hit a boost in `[0, B]`:
//!
//! ```text
//! boost = min(clamp(raw, -B, B) - min(0, lowest clamped raw), B)
//! final_score = dense_score + boost
//! ```
//!
//! Two boosts never differ by more than `B`, so a hit can only overtake one
//! whose dense score is at most `B` higher. Penalties still count: they lower
//! a hit relative to the rest of its candidate set.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RerankConfig, DEFAULT_CLAMP};
use crate::constraints::QueryConstraints;
use crate::errors::BprError;
use crate::signals::{check_payload, SignalRegistry};
use crate::types::{DedupedHit, RiderId, ScoredHit};

/// Signal contributions for one reranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankDebug {
    pub rider_id: RiderId,
    pub dense_score: f64,
    /// Sum of the fired deltas before clamping.
    pub raw_boost: f64,
    /// Boost applied, in `[0, B]`.
    pub boost: f64,
    pub final_score: f64,
    /// Delta per fired signal.
    pub deltas: BTreeMap<String, f64>,
    /// Payload fields that had the wrong JSON type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub malformed_fields: Vec<String>,
}

/// Reranked hits and their debug records, in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub hits: Vec<ScoredHit>,
    pub debug: Vec<RerankDebug>,
}

/// Order for reranked hits: final score descending, then dense score
/// descending, then rider id ascending.
pub fn compare_scored(a: &ScoredHit, b: &ScoredHit) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| b.dense_score.total_cmp(&a.dense_score))
        .then_with(|| a.rider_id.cmp(&b.rider_id))
}

/// Symmetric clamp that tolerates a zero bound.
fn clamp_boost(raw: f64, bound: f64) -> f64 {
    raw.max(-bound).min(bound)
}

/// Map clamped sums into `[0, bound]` relative to the lowest one.
fn relative_boosts(clamped: &[f64], bound: f64) -> Vec<f64> {
    let floor = clamped.iter().copied().fold(0.0_f64, f64::min);
    clamped.iter().map(|c| (c - floor).min(bound)).collect()
}

/// Payload-aware reranker.
#[derive(Debug, Clone)]
pub struct Reranker {
    registry: SignalRegistry,
    clamp: f64,
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(SignalRegistry::with_defaults(), DEFAULT_CLAMP)
    }
}

impl Reranker {
    /// Create a reranker. Negative or non-finite clamps are treated as 0.
    pub fn new(registry: SignalRegistry, clamp: f64) -> Self {
        let clamp = if clamp.is_finite() { clamp.max(0.0) } else { 0.0 };
        Self { registry, clamp }
    }

    /// Build from the `rerank` config section.
    pub fn from_config(config: &RerankConfig) -> Self {
        let (registry, unknown) = SignalRegistry::with_weights(&config.weights);
        if !unknown.is_empty() {
            debug!("Ignoring unknown signal weights: {}", unknown.join(", "));
        }
        Self::new(registry, config.clamp)
    }

    pub fn clamp(&self) -> f64 {
        self.clamp
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    /// Score and re-sort deduplicated hits.
    ///
    /// Pure: the input is not modified and the same hits and constraints always
    /// produce the same order. Boosts are relative to the other hits given in
    /// the same call.
    pub fn rerank(&self, hits: &[DedupedHit], constraints: &QueryConstraints) -> RerankOutcome {
        let evaluated: Vec<(BTreeMap<String, f64>, f64)> = hits
            .iter()
            .map(|hit| {
                let deltas = self.registry.evaluate(&hit.payload, constraints);
                let raw_boost: f64 = deltas.values().sum();
                (deltas, raw_boost)
            })
            .collect();
        let clamped: Vec<f64> = evaluated
            .iter()
            .map(|(_, raw)| clamp_boost(*raw, self.clamp))
            .collect();
        let boosts = relative_boosts(&clamped, self.clamp);

        let mut scored: Vec<(ScoredHit, RerankDebug)> = hits
            .iter()
            .zip(evaluated)
            .zip(boosts)
            .map(|((hit, (deltas, raw_boost)), boost)| score_hit(hit, deltas, raw_boost, boost))
            .collect();

        scored.sort_by(|(a, _), (b, _)| compare_scored(a, b));

        let (hits, debug) = scored.into_iter().unzip();
        RerankOutcome { hits, debug }
    }
}

fn score_hit(
    hit: &DedupedHit,
    deltas: BTreeMap<String, f64>,
    raw_boost: f64,
    boost: f64,
) -> (ScoredHit, RerankDebug) {
    let malformed_fields: Vec<String> = check_payload(&hit.chunk_id, &hit.payload)
        .into_iter()
        .filter_map(|e| match e {
            BprError::MalformedPayload { field, .. } => Some(field),
            _ => None,
        })
        .collect();

    let final_score = hit.dense_score + boost;

    let scored = ScoredHit {
        rider_id: hit.rider_id.clone(),
        dense_score: hit.dense_score,
        boost,
        final_score,
        chunk_id: hit.chunk_id.clone(),
        payload: hit.payload.clone(),
    };
    let debug = RerankDebug {
        rider_id: hit.rider_id.clone(),
        dense_score: hit.dense_score,
        raw_boost,
        boost,
        final_score,
        deltas,
        malformed_fields,
    };
    (scored, debug)
}
