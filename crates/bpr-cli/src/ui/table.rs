//! Table rendering for CLI output using comfy-table.
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `bpr search` | `render_hits_table()`, `render_signals_table()` |
//! | `bpr eval` | `render_metrics_table()`, `render_worst_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, Table, Width};

use bpr_core::report::WorstQuery;
use bpr_core::{RerankDebug, ScoredHit};

use super::format::{format_delta, format_metric, truncate_str};

fn right(text: impl ToString) -> Cell {
    Cell::new(text.to_string()).set_alignment(CellAlignment::Right)
}

fn payload_text(hit: &ScoredHit) -> &str {
    hit.payload
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

/// Render ranked riders for `bpr search`.
///
/// # Example Output
///
/// ```text
/// #  RIDER  DENSE   BOOST    FINAL   TEXT
/// 1  r-17   0.8120  +0.0250  0.8370  Salsa Cutthroat, 2.2in tyres...
/// ```
pub fn render_hits_table(hits: &[ScoredHit], text_width: usize) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("#"),
        Cell::new("RIDER"),
        right("DENSE"),
        right("BOOST"),
        right("FINAL"),
        Cell::new("TEXT"),
    ]);
    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(2)),
        ColumnConstraint::LowerBoundary(Width::Fixed(6)),
    ]);

    for (i, hit) in hits.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(hit.rider_id.as_str()),
            right(format!("{:.4}", hit.dense_score)),
            right(format_delta(hit.boost)),
            right(format!("{:.4}", hit.final_score)),
            Cell::new(truncate_str(payload_text(hit), text_width)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render the fired signals of each reranked hit.
pub fn render_signals_table(debug: &[RerankDebug]) -> String {
    if debug.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("RIDER"),
        right("RAW"),
        right("BOOST"),
        Cell::new("SIGNALS"),
    ]);

    for record in debug {
        let mut signals: Vec<String> = record
            .deltas
            .iter()
            .map(|(name, delta)| format!("{}={}", name, format_delta(*delta)))
            .collect();
        if !record.malformed_fields.is_empty() {
            signals.push(format!("malformed: {}", record.malformed_fields.join(",")));
        }
        table.add_row(vec![
            Cell::new(record.rider_id.as_str()),
            right(format_delta(record.raw_boost)),
            right(format_delta(record.boost)),
            Cell::new(if signals.is_empty() {
                "-".to_string()
            } else {
                signals.join(" ")
            }),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render the lowest-MRR queries of an evaluation run.
pub fn render_worst_table(worst: &[WorstQuery], query_width: usize) -> String {
    if worst.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("QID"),
        right("MRR"),
        right("BASE"),
        right("RERANK"),
        Cell::new("FALLBACK"),
        Cell::new("QUERY"),
    ]);

    for entry in worst {
        table.add_row(vec![
            Cell::new(&entry.qid),
            right(format_metric(entry.mrr_at_k)),
            right(format_metric(entry.baseline_mrr_at_k)),
            right(format_metric(entry.reranked_mrr_at_k)),
            Cell::new(if entry.used_fallback { "yes" } else { "no" }),
            Cell::new(truncate_str(&entry.query, query_width)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render a simple key-value metrics table.
///
/// # Example Output
///
/// ```text
/// METRIC          VALUE
/// hitrate@k      0.8000
/// mrr@k          0.6125
/// ```
pub fn render_metrics_table(metrics: &[(&str, String)]) -> String {
    if metrics.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![Cell::new("METRIC"), right("VALUE")]);

    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(18)),
        ColumnConstraint::LowerBoundary(Width::Fixed(10)),
    ]);

    for (key, value) in metrics {
        table.add_row(vec![Cell::new(*key), right(value)]);
    }

    table.trim_fmt().to_string()
}
