//! Evaluation report model and writer.
//!
//! The JSON layout uses camelCase keys. Optional metrics are `null` for
//! queries that could not be scored so that consumers can tell "not scored"
//! from "scored zero".

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BprConfig, EmptyQrelPolicy};
use crate::errors::BprError;
use crate::rerank::RerankDebug;
use crate::types::{MetricReport, Ranking, RiderId, ScoredHit};

/// Characters of chunk text kept in a preview.
pub const PREVIEW_TEXT_CHARS: usize = 220;

// ============================================================================
// Per-query
// ============================================================================

/// Short human-readable view of a ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitPreview {
    pub rider_id: RiderId,
    pub score: f64,
    pub event_key: String,
    pub tyre_width: String,
    pub frame_type: String,
    pub electronic_shifting: serde_json::Value,
    pub text: String,
}

fn payload_str(hit: &ScoredHit, field: &str) -> String {
    hit.payload
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

impl HitPreview {
    pub fn from_hit(hit: &ScoredHit) -> Self {
        Self {
            rider_id: hit.rider_id.clone(),
            score: hit.final_score,
            event_key: payload_str(hit, "event_key"),
            tyre_width: payload_str(hit, "tyre_width"),
            frame_type: payload_str(hit, "frame_type"),
            electronic_shifting: hit
                .payload
                .get("electronic_shifting")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            text: payload_str(hit, "text").chars().take(PREVIEW_TEXT_CHARS).collect(),
        }
    }
}

/// Previews of the first `n` hits.
pub fn preview(hits: &[ScoredHit], n: usize) -> Vec<HitPreview> {
    hits.iter().take(n).map(HitPreview::from_hit).collect()
}

/// One candidate ranking as shown in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSection {
    pub retrieved: Ranking,
    pub preview: Vec<HitPreview>,
    pub hitrate_at_k: Option<f64>,
    pub mrr_at_k: Option<f64>,
}

/// The ranking chosen by the arbiter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalSection {
    pub retrieved: Ranking,
    pub used_fallback: bool,
}

/// What happened to a query during the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryStatus {
    /// Judged and scored.
    Scored,
    /// No judgment; ranked but not scored.
    Unlabeled,
    /// Judged, but the judgment lists no relevant rider.
    EmptyRelevanceSet,
    /// Embedding or retrieval failed.
    RetrievalFailed,
    /// Skipped because the run was cancelled.
    Cancelled,
}

/// Full per-query record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryReport {
    pub qid: String,
    pub query: String,
    pub k: usize,
    pub labeled: bool,
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub apply_rerank: bool,
    pub retrieve_k: usize,
    pub dedupe_in: usize,
    pub dedupe_out: usize,
    pub hitrate_at_k: Option<f64>,
    pub set_recall_at_k: Option<f64>,
    pub precision_at_k: Option<f64>,
    pub mrr_at_k: Option<f64>,
    pub retrieval_latency_ms: f64,
    pub rerank_latency_ms: f64,
    pub total_latency_ms: f64,
    pub fallback_used: bool,
    pub relevant_ids: Vec<RiderId>,
    pub diag: Option<BTreeMap<String, f64>>,
    pub baseline: Option<RankingSection>,
    pub reranked: Option<RankingSection>,
    #[serde(rename = "final")]
    pub final_ranking: FinalSection,
    pub rerank_regressed: bool,
    pub rerank_debug_topk: Option<Vec<RerankDebug>>,
}

impl QueryReport {
    /// An empty record for a query that produced no ranking.
    pub fn unranked(qid: &str, query: &str, k: usize, status: QueryStatus) -> Self {
        Self {
            qid: qid.to_string(),
            query: query.to_string(),
            k,
            labeled: false,
            status,
            error: None,
            apply_rerank: false,
            retrieve_k: 0,
            dedupe_in: 0,
            dedupe_out: 0,
            hitrate_at_k: None,
            set_recall_at_k: None,
            precision_at_k: None,
            mrr_at_k: None,
            retrieval_latency_ms: 0.0,
            rerank_latency_ms: 0.0,
            total_latency_ms: 0.0,
            fallback_used: false,
            relevant_ids: Vec::new(),
            diag: None,
            baseline: None,
            reranked: None,
            final_ranking: FinalSection::default(),
            rerank_regressed: false,
            rerank_debug_topk: None,
        }
    }

    /// The compact per-query metric record, for scored and empty-judgment queries.
    pub fn metric_report(&self) -> Option<MetricReport> {
        Some(MetricReport {
            query_id: self.qid.clone(),
            hitrate_at_k: self.hitrate_at_k?,
            mrr_at_k: self.mrr_at_k?,
            dedupe_in: self.dedupe_in,
            dedupe_out: self.dedupe_out,
            retrieval_latency_ms: self.retrieval_latency_ms,
            rerank_latency_ms: self.rerank_latency_ms,
            fallback_used: self.fallback_used,
        })
    }

    /// Whether the query enters the aggregate means under `policy`.
    pub fn counts_in_means(&self, policy: EmptyQrelPolicy) -> bool {
        match self.status {
            QueryStatus::Scored => true,
            QueryStatus::EmptyRelevanceSet => policy == EmptyQrelPolicy::CountAsZero,
            _ => false,
        }
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Entry of the worst-queries list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorstQuery {
    pub qid: String,
    pub k: usize,
    pub mrr_at_k: Option<f64>,
    pub hitrate_at_k: Option<f64>,
    pub baseline_mrr_at_k: Option<f64>,
    pub reranked_mrr_at_k: Option<f64>,
    pub used_fallback: bool,
    pub query: String,
}

/// Aggregates over a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub hitrate_at_k: f64,
    pub set_recall_at_k: f64,
    pub precision_at_k: f64,
    pub mrr_at_k: f64,
    pub avg_latency_ms_retrieval: f64,
    pub avg_latency_ms_rerank: f64,
    pub avg_latency_ms_total: f64,
    pub n_fallback: usize,
    pub n_rerank_regressed: usize,
    pub n_unscorable: usize,
    pub n_failed: usize,
    pub n_skipped: usize,
    pub cancelled: bool,
    pub worst_queries_by_mrr: Vec<WorstQuery>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Aggregate per-query records.
///
/// Means cover the queries selected by `policy`; latencies cover every query
/// that reached retrieval.
pub fn summarize(per_query: &[QueryReport], policy: EmptyQrelPolicy, worst_n: usize) -> RunSummary {
    let in_means: Vec<&QueryReport> = per_query.iter().filter(|q| q.counts_in_means(policy)).collect();
    let metric = |f: fn(&QueryReport) -> Option<f64>| mean(in_means.iter().map(|q| f(q).unwrap_or(0.0)));

    let timed: Vec<&QueryReport> = per_query
        .iter()
        .filter(|q| !matches!(q.status, QueryStatus::Cancelled | QueryStatus::RetrievalFailed))
        .collect();

    let mut scored: Vec<&QueryReport> = per_query
        .iter()
        .filter(|q| q.status == QueryStatus::Scored)
        .collect();
    scored.sort_by(|a, b| {
        a.mrr_at_k
            .unwrap_or(0.0)
            .total_cmp(&b.mrr_at_k.unwrap_or(0.0))
            .then_with(|| a.qid.cmp(&b.qid))
    });

    let worst_queries_by_mrr = scored
        .into_iter()
        .take(worst_n)
        .map(|q| WorstQuery {
            qid: q.qid.clone(),
            k: q.k,
            mrr_at_k: q.mrr_at_k,
            hitrate_at_k: q.hitrate_at_k,
            baseline_mrr_at_k: q.baseline.as_ref().and_then(|s| s.mrr_at_k),
            reranked_mrr_at_k: q.reranked.as_ref().and_then(|s| s.mrr_at_k),
            used_fallback: q.final_ranking.used_fallback,
            query: q.query.clone(),
        })
        .collect();

    let n_skipped = per_query.iter().filter(|q| q.status == QueryStatus::Cancelled).count();

    RunSummary {
        hitrate_at_k: metric(|q| q.hitrate_at_k),
        set_recall_at_k: metric(|q| q.set_recall_at_k),
        precision_at_k: metric(|q| q.precision_at_k),
        mrr_at_k: metric(|q| q.mrr_at_k),
        avg_latency_ms_retrieval: mean(timed.iter().map(|q| q.retrieval_latency_ms)),
        avg_latency_ms_rerank: mean(timed.iter().map(|q| q.rerank_latency_ms)),
        avg_latency_ms_total: mean(timed.iter().map(|q| q.total_latency_ms)),
        n_fallback: per_query.iter().filter(|q| q.final_ranking.used_fallback).count(),
        n_rerank_regressed: per_query.iter().filter(|q| q.rerank_regressed).count(),
        n_unscorable: per_query
            .iter()
            .filter(|q| q.status == QueryStatus::EmptyRelevanceSet)
            .count(),
        n_failed: per_query
            .iter()
            .filter(|q| q.status == QueryStatus::RetrievalFailed)
            .count(),
        n_skipped,
        cancelled: n_skipped > 0,
        worst_queries_by_mrr,
    }
}

// ============================================================================
// Report
// ============================================================================

/// A complete evaluation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub run_id: String,
    pub created_at: DateTime<Local>,
    pub retriever: String,
    pub embedding_model: String,
    pub apply_rerank: bool,
    pub empty_qrel_policy: EmptyQrelPolicy,
    pub n_queries: usize,
    pub n_labeled: usize,
    pub summary: RunSummary,
    pub config: BprConfig,
    pub per_query: Vec<QueryReport>,
}

impl EvalReport {
    /// Per-query metric records of every scored or empty-judgment query.
    pub fn metric_reports(&self) -> Vec<MetricReport> {
        self.per_query.iter().filter_map(QueryReport::metric_report).collect()
    }
}

/// File name for a report: `retrieval_report_<retriever>_<YYYYmmdd_HHMMSS>.json`.
pub fn report_file_name(retriever: &str, at: &DateTime<Local>) -> String {
    format!("retrieval_report_{}_{}.json", retriever, at.format("%Y%m%d_%H%M%S"))
}

/// Write the report as pretty JSON under `dir`, creating it if needed.
pub fn write_report(report: &EvalReport, dir: &Path) -> Result<PathBuf, BprError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(&report.retriever, &report.created_at));
    let content = serde_json::to_string_pretty(report)?;
    fs::write(&path, content)?;
    info!("Saved report: {}", path.display());
    Ok(path)
}

/// Write one [`MetricReport`] per scored query as JSON lines.
///
/// Returns the number of records written. Unlabeled, failed and cancelled
/// queries carry no metrics and are left out.
pub fn write_metric_records(report: &EvalReport, path: &Path) -> Result<usize, BprError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let records = report.metric_reports();
    let mut content = String::new();
    for record in &records {
        content.push_str(&serde_json::to_string(record)?);
        content.push('\n');
    }
    fs::write(path, content)?;
    info!("Saved {} metric records: {}", records.len(), path.display());
    Ok(records.len())
}

// ============================================================================
// Checkpoint
// ============================================================================

/// Queries finished so far in a running evaluation.
///
/// Starts as a report whose queries are all `cancelled` and fills in each
/// query as it completes, so a run that is aborted mid-way can still be
/// written with what it has.
#[derive(Debug, Default)]
pub struct RunCheckpoint {
    state: Mutex<Option<(EvalReport, PathBuf)>>,
}

impl RunCheckpoint {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Start tracking a run whose report will go to `dir`.
    pub fn begin(&self, pending: EvalReport, dir: PathBuf) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = Some((pending, dir));
        }
    }

    /// Replace the pending entry of a finished query.
    pub fn record(&self, finished: &QueryReport) {
        if let Ok(mut guard) = self.state.lock() {
            if let Some((report, _)) = guard.as_mut() {
                let slot = report
                    .per_query
                    .iter_mut()
                    .find(|q| q.qid == finished.qid && q.status == QueryStatus::Cancelled);
                if let Some(slot) = slot {
                    *slot = finished.clone();
                }
            }
        }
    }

    /// Stop tracking; later writes do nothing.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// The report as it stands, with the summary recomputed over the
    /// finished queries. `None` when no run is tracked.
    pub fn snapshot(&self) -> Option<EvalReport> {
        let guard = self.state.lock().ok()?;
        let (report, _) = guard.as_ref()?;
        let mut report = report.clone();
        drop(guard);

        report.summary = summarize(
            &report.per_query,
            report.empty_qrel_policy,
            report.config.eval.worst_n,
        );
        report.n_labeled = report
            .per_query
            .iter()
            .filter(|q| q.status == QueryStatus::Scored)
            .count();
        Some(report)
    }

    /// Write the queries finished so far. `Ok(None)` when no run is tracked.
    pub fn write(&self) -> Result<Option<PathBuf>, BprError> {
        let dir = self
            .state
            .lock()
            .map_err(|e| BprError::Other(anyhow::anyhow!("Checkpoint lock poisoned: {}", e)))?
            .as_ref()
            .map(|(_, dir)| dir.clone());
        match (self.snapshot(), dir) {
            (Some(report), Some(dir)) => write_report(&report, &dir).map(Some),
            _ => Ok(None),
        }
    }
}
