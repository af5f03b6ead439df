//! Evaluation datasets: queries, relevance judgments and graded labels.
//!
//! Queries and qrels are strict JSONL, one object per line. Label files are
//! hand-edited and often pretty-printed, so they go through a tolerant reader
//! that reassembles multi-line objects by tracking brace depth.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::BprError;
use crate::types::{QueryRecord, Qrel, RiderId};

/// Maximum characters of an offending object quoted in an error.
const ERROR_SNIPPET_LEN: usize = 500;

// ============================================================================
// Strict JSONL
// ============================================================================

/// Read a JSONL file into typed rows, skipping blank lines.
///
/// Each row is returned with its 1-based line number.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<(usize, T)>, BprError> {
    let file = File::open(path)
        .map_err(|e| BprError::dataset(path, 0, format!("Failed to open: {}", e)))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result
            .map_err(|e| BprError::dataset(path, line_num + 1, format!("Failed to read: {}", e)))?;

        if line.trim().is_empty() {
            continue;
        }

        let row: T = serde_json::from_str(&line)
            .map_err(|e| BprError::dataset(path, line_num + 1, format!("Failed to parse: {}", e)))?;
        rows.push((line_num + 1, row));
    }

    Ok(rows)
}

/// Load evaluation queries.
///
/// # Errors
///
/// Returns [`BprError::Dataset`] if the file cannot be read, a line is not a
/// query object, or a query has an empty id or text.
pub fn load_queries(path: &Path) -> Result<Vec<QueryRecord>, BprError> {
    let rows: Vec<(usize, QueryRecord)> = read_jsonl(path)?;
    let mut queries = Vec::with_capacity(rows.len());

    for (line, query) in rows {
        if query.query_id.trim().is_empty() {
            return Err(BprError::dataset(path, line, "query id is empty"));
        }
        if query.text.trim().is_empty() {
            return Err(BprError::dataset(path, line, "query text is empty"));
        }
        if query.k == Some(0) {
            return Err(BprError::dataset(path, line, "k must be at least 1"));
        }
        queries.push(query);
    }

    debug!("Loaded {} queries from {}", queries.len(), path.display());
    Ok(queries)
}

#[derive(Debug, Deserialize)]
struct QrelRow {
    #[serde(alias = "query_id")]
    qid: String,
    #[serde(default, alias = "relevant_rider_ids")]
    relevant_ids: Vec<serde_json::Value>,
}

/// Load relevance judgments keyed by query id.
///
/// Rider ids may be strings or integers. A query listed twice keeps its last
/// row.
pub fn load_qrels(path: &Path) -> Result<BTreeMap<String, Qrel>, BprError> {
    let rows: Vec<(usize, QrelRow)> = read_jsonl(path)?;
    let mut qrels = BTreeMap::new();

    for (line, row) in rows {
        let relevant = row
            .relevant_ids
            .iter()
            .map(|v| {
                RiderId::from_json(v).ok_or_else(|| {
                    BprError::dataset(path, line, format!("invalid rider id {}", v))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let qrel = Qrel::new(row.qid.clone(), relevant);
        if qrels.insert(row.qid.clone(), qrel).is_some() {
            warn!("Duplicate qrel for query {} at line {}; keeping the last one", row.qid, line);
        }
    }

    debug!("Loaded {} qrels from {}", qrels.len(), path.display());
    Ok(qrels)
}

#[derive(Serialize)]
struct QrelLine<'a> {
    qid: &'a str,
    relevant_ids: &'a std::collections::BTreeSet<RiderId>,
}

/// Write judgments as qrels JSONL, one row per query.
pub fn write_qrels<'a, I>(path: &Path, qrels: I) -> Result<usize, BprError>
where
    I: IntoIterator<Item = &'a Qrel>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    let mut n = 0;
    for qrel in qrels {
        let line = serde_json::to_string(&QrelLine {
            qid: &qrel.query_id,
            relevant_ids: &qrel.relevant_rider_ids,
        })?;
        writeln!(file, "{}", line)?;
        n += 1;
    }
    file.flush()?;
    Ok(n)
}

// ============================================================================
// Tolerant object reader
// ============================================================================

/// Brace depth tracker that ignores braces inside JSON strings.
#[derive(Debug, Default)]
struct DepthTracker {
    depth: i64,
    in_string: bool,
    escaped: bool,
}

impl DepthTracker {
    fn feed(&mut self, text: &str) {
        for ch in text.chars() {
            if self.escaped {
                self.escaped = false;
                continue;
            }
            match ch {
                '\\' => self.escaped = true,
                '"' => self.in_string = !self.in_string,
                _ if self.in_string => {}
                '{' => self.depth += 1,
                '}' => self.depth -= 1,
                _ => {}
            }
        }
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(ERROR_SNIPPET_LEN).collect()
}

/// Parse a mostly-JSONL document that may contain blank lines and
/// pretty-printed multi-line objects.
///
/// Each value is returned with the 1-based line it starts on.
///
/// # Errors
///
/// Returns [`BprError::Dataset`] for an object that does not parse, or for
/// text left over at the end that never closes its braces.
pub fn parse_json_objects(
    content: &str,
    path: &Path,
) -> Result<Vec<(usize, serde_json::Value)>, BprError> {
    let mut values = Vec::new();
    let mut buf = String::new();
    let mut start_line = 0;
    let mut tracker = DepthTracker::default();

    for (idx, raw) in content.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        if buf.is_empty() {
            start_line = idx + 1;
        }
        buf.push_str(raw);
        buf.push('\n');
        tracker.feed(raw);

        if tracker.depth == 0 {
            let chunk = buf.trim();
            let value = serde_json::from_str(chunk).map_err(|e| {
                BprError::dataset(
                    path,
                    start_line,
                    format!("Failed to parse JSON object ({}) near:\n{}", e, snippet(chunk)),
                )
            })?;
            values.push((start_line, value));
            buf.clear();
            tracker = DepthTracker::default();
        }
    }

    if !buf.trim().is_empty() {
        return Err(BprError::dataset(
            path,
            start_line,
            format!("Trailing incomplete JSON object:\n{}", snippet(buf.trim())),
        ));
    }

    Ok(values)
}

/// Read a file with [`parse_json_objects`].
pub fn read_json_objects(path: &Path) -> Result<Vec<(usize, serde_json::Value)>, BprError> {
    let content = fs::read_to_string(path)
        .map_err(|e| BprError::dataset(path, 0, format!("Failed to read: {}", e)))?;
    parse_json_objects(&content, path)
}

// ============================================================================
// Labels -> qrels
// ============================================================================

/// Default minimum grade for a labelled rider to count as relevant.
pub const DEFAULT_MIN_REL: i64 = 1;

#[derive(Debug, Deserialize)]
struct LabelRow {
    #[serde(alias = "query_id")]
    qid: String,
    #[serde(default)]
    relevants: Vec<LabelEntry>,
}

#[derive(Debug, Deserialize)]
struct LabelEntry {
    rider_id: serde_json::Value,
    #[serde(default)]
    rel: serde_json::Value,
}

/// Read a grade that may be a number, a numeric string or absent.
fn grade(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Null => Some(0),
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Convert graded labels into binary judgments.
///
/// Riders graded at least `min_rel` are relevant. Rows keep their file order.
pub fn labels_to_qrels(
    labels: &[(usize, serde_json::Value)],
    path: &Path,
    min_rel: i64,
) -> Result<Vec<Qrel>, BprError> {
    let mut qrels = Vec::with_capacity(labels.len());

    for (line, value) in labels {
        let row: LabelRow = serde_json::from_value(value.clone())
            .map_err(|e| BprError::dataset(path, *line, format!("Invalid label row: {}", e)))?;

        let mut relevant = Vec::new();
        for entry in &row.relevants {
            let rel = grade(&entry.rel).ok_or_else(|| {
                BprError::dataset(path, *line, format!("invalid rel {}", entry.rel))
            })?;
            if rel < min_rel {
                continue;
            }
            let rider = RiderId::from_json(&entry.rider_id).ok_or_else(|| {
                BprError::dataset(path, *line, format!("invalid rider id {}", entry.rider_id))
            })?;
            relevant.push(rider);
        }

        qrels.push(Qrel::new(row.qid, relevant));
    }

    Ok(qrels)
}

/// Summary of a [`build_qrels`] run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildQrelsSummary {
    pub out_path: PathBuf,
    pub rows: usize,
    pub min_rel: i64,
    /// Rows whose relevance set ended up empty.
    pub empty_rows: usize,
}

/// Turn a labels file into a qrels file.
pub fn build_qrels(labels_path: &Path, out_path: &Path, min_rel: i64) -> Result<BuildQrelsSummary, BprError> {
    let labels = read_json_objects(labels_path)?;
    let qrels = labels_to_qrels(&labels, labels_path, min_rel)?;
    let empty_rows = qrels.iter().filter(|q| q.is_empty()).count();
    let rows = write_qrels(out_path, &qrels)?;

    debug!(
        "Wrote {} qrels to {} (min_rel={}, empty={})",
        rows,
        out_path.display(),
        min_rel,
        empty_rows
    );

    Ok(BuildQrelsSummary {
        out_path: out_path.to_path_buf(),
        rows,
        min_rel,
        empty_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_queries_with_aliases() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("queries.jsonl");
        fs::write(
            &path,
            "{\"qid\": \"q1\", \"query\": \"rigid TCR bike\", \"k\": 5}\n\n{\"query_id\": \"q2\", \"text\": \"garmin only\"}\n",
        )
        .unwrap();

        let queries = load_queries(&path).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].k, Some(5));
        assert_eq!(queries[1].query_id, "q2");
        assert!(queries[1].effective_constraints().require_garmin);
    }

    #[test]
    fn test_malformed_query_line_names_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("queries.jsonl");
        fs::write(&path, "{\"qid\": \"q1\", \"query\": \"x\"}\nnot json\n").unwrap();

        match load_queries(&path).unwrap_err() {
            BprError::Dataset { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_qrels_mixed_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("qrels.jsonl");
        fs::write(
            &path,
            "{\"qid\": \"q1\", \"relevant_ids\": [12, \"r-3\"]}\n{\"query_id\": \"q2\", \"relevant_rider_ids\": []}\n",
        )
        .unwrap();

        let qrels = load_qrels(&path).unwrap();
        assert!(qrels["q1"].relevant_rider_ids.contains(&RiderId::new("12")));
        assert!(qrels["q1"].relevant_rider_ids.contains(&RiderId::new("r-3")));
        assert!(qrels["q2"].is_empty());
    }

    #[test]
    fn test_invalid_rider_id_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("qrels.jsonl");
        fs::write(&path, "{\"qid\": \"q1\", \"relevant_ids\": [{\"id\": 1}]}\n").unwrap();
        assert!(matches!(load_qrels(&path), Err(BprError::Dataset { line: 1, .. })));
    }

    #[test]
    fn test_tolerant_reader_handles_pretty_objects() {
        let content = "{\"qid\": \"q1\", \"relevants\": []}\n\n{\n  \"qid\": \"q2\",\n  \"note\": \"braces } in { strings \\\" ok\",\n  \"relevants\": [{\"rider_id\": 1, \"rel\": 2}]\n}\n";
        let values = parse_json_objects(content, Path::new("labels.jsonl")).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].0, 1);
        assert_eq!(values[1].0, 3);
        assert_eq!(values[1].1["qid"], "q2");
    }

    #[test]
    fn test_tolerant_reader_rejects_trailing_object() {
        let content = "{\"qid\": \"q1\", \"relevants\": []}\n{\n  \"qid\": \"q2\",\n";
        let err = parse_json_objects(content, Path::new("labels.jsonl")).unwrap_err();
        assert!(err.to_string().contains("Trailing incomplete"));
        assert!(err.to_string().contains("q2"));
    }

    #[test]
    fn test_build_qrels_applies_min_rel() {
        let temp = TempDir::new().unwrap();
        let labels = temp.path().join("labels.jsonl");
        let out = temp.path().join("out").join("qrels.jsonl");
        fs::write(
            &labels,
            "{\"qid\": \"q1\", \"relevants\": [{\"rider_id\": 1, \"rel\": 2}, {\"rider_id\": 2, \"rel\": 1}, {\"rider_id\": 3}]}\n{\"qid\": \"q2\", \"relevants\": [{\"rider_id\": \"9\", \"rel\": \"0\"}]}\n",
        )
        .unwrap();

        let summary = build_qrels(&labels, &out, 2).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.empty_rows, 1);

        let qrels = load_qrels(&out).unwrap();
        assert_eq!(qrels["q1"], Qrel::new("q1", ["1"]));
        assert!(qrels["q2"].is_empty());

        build_qrels(&labels, &out, DEFAULT_MIN_REL).unwrap();
        let qrels = load_qrels(&out).unwrap();
        assert_eq!(qrels["q1"].relevant_rider_ids.len(), 2);
    }
}
