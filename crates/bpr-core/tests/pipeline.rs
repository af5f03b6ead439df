//! End-to-end properties of the ranking pipeline over an in-memory store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use bpr_core::{
    BprConfig, BprEngine, EmbeddingBackend, EmbeddingConfig, LocalHashEmbedder, Qrel, QueryRecord,
    QueryReport, QueryStatus,
};
use bpr_db::vector::{
    VectorId, VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchFilter,
    VectorSearchResult,
};
use bpr_db::DbResult;

const DIM: usize = 96;

/// Dot-product store kept in memory.
#[derive(Default)]
struct MemoryIndex {
    points: RwLock<BTreeMap<u64, (Vec<f32>, serde_json::Value)>>,
}

impl VectorIndexBackend for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&VectorSearchFilter>,
    ) -> DbResult<Vec<VectorSearchResult>> {
        let points = self.points.read().unwrap();
        let mut scored: Vec<VectorSearchResult> = points
            .iter()
            .filter(|(_, (_, payload))| filter.map(|f| f.matches(payload)).unwrap_or(true))
            .map(|(id, (vector, payload))| {
                let score = vector.iter().zip(embedding).map(|(a, b)| a * b).sum();
                VectorSearchResult::new(VectorId::new(*id), score, payload.clone())
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(limit);
        Ok(scored)
    }

    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()> {
        let mut points = self.points.write().unwrap();
        for v in vectors {
            points.insert(v.id.value(), (v.vector.clone(), v.payload.clone()));
        }
        Ok(())
    }

    fn delete(&self, ids: &[VectorId]) -> DbResult<()> {
        let mut points = self.points.write().unwrap();
        for id in ids {
            points.remove(&id.value());
        }
        Ok(())
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }

    fn len(&self) -> DbResult<usize> {
        Ok(self.points.read().unwrap().len())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn metric(&self) -> VectorMetric {
        VectorMetric::Dot
    }
}

const CHUNKS: &str = r#"{"rider_id": "r1", "chunk_index": 0, "text": "steel frame, rigid fork, mechanical shifting, 2.2in tyres", "electronic_shifting": false, "frame_type": "rigid", "tyre_width": "50mm+"}
{"rider_id": "r1", "chunk_index": 1, "text": "tubeless with plugs for puncture repair"}
{"rider_id": "r2", "chunk_index": 0, "text": "carbon frame, electronic shifting, 40mm tyres", "electronic_shifting": true, "frame_type": "rigid", "tyre_width": "40-45mm"}
{"rider_id": "r3", "chunk_index": 0, "text": "full suspension bike with garmin and wide range gearing", "frame_type": "full suspension", "tyre_width": "50mm+"}
{"rider_id": "r4", "chunk_index": 0, "text": "gravel bike, mechanical shifting, wahoo computer", "electronic_shifting": false, "tyre_width": "40-45mm"}
{"rider_id": 5, "chunk_index": 0, "text": "titanium frame with dynamo and tubeless tyres", "event_key": "transcontinental-2024"}
{"rider_id": 5, "chunk_index": 1, "text": "mechanical shifting with a 10-52 cassette for steep climbs"}
"#;

fn engine(dir: &tempfile::TempDir, rerank: bool) -> BprEngine {
    let mut config = BprConfig::default();
    config.index.dimension = DIM;
    config.embedding = EmbeddingConfig {
        dimension: DIM,
        ..Default::default()
    };
    config.rerank.enabled = rerank;
    config.eval.max_concurrency = 3;
    config.eval.report_dir = dir.path().join("reports");

    let index: Arc<dyn VectorIndexBackend> = Arc::new(MemoryIndex::default());
    let engine = BprEngine::with_parts(config, index, Box::new(LocalHashEmbedder::new(DIM))).unwrap();

    let chunks = dir.path().join("chunks.jsonl");
    std::fs::write(&chunks, CHUNKS).unwrap();
    engine.ingest(&chunks).unwrap();
    engine
}

fn queries() -> Vec<QueryRecord> {
    vec![
        QueryRecord::new("q1", "mechanical shifting, rigid, no suspension, 45-60mm tyres"),
        QueryRecord::new("q2", "electronic shifting carbon frame"),
        QueryRecord::new("q3", "garmin only, wide range gearing for steep climbs"),
        QueryRecord::new("q4", "transcontinental titanium dynamo, puncture proof"),
        QueryRecord::new("q5", "wahoo gravel"),
        QueryRecord::new("q6", "anything at all"),
    ]
}

fn qrels() -> BTreeMap<String, Qrel> {
    [
        Qrel::new("q1", ["r1"]),
        Qrel::new("q2", ["r2"]),
        Qrel::new("q3", ["r3", "5"]),
        Qrel::new("q4", ["5"]),
        Qrel::new("q5", Vec::<String>::new()),
    ]
    .into_iter()
    .map(|q| (q.query_id.clone(), q))
    .collect()
}

#[test]
fn search_returns_unique_riders_within_clamp() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine(&dir, true);
    let clamp = engine.reranker().unwrap().clamp();

    for query in queries() {
        for k in [1, 2, 3, 10] {
            let result = engine.search(&query.text, Some(k)).unwrap();
            assert!(result.hits.len() <= k);

            let riders: BTreeSet<_> = result.hits.iter().map(|h| &h.rider_id).collect();
            assert_eq!(riders.len(), result.hits.len(), "duplicate rider for {}", query.text);

            for hit in &result.hits {
                assert!((hit.final_score - hit.dense_score).abs() <= clamp + 1e-12);
                assert_eq!(hit.final_score, hit.dense_score + hit.boost);
            }
            for pair in result.hits.windows(2) {
                assert!(pair[0].final_score >= pair[1].final_score);
            }
        }
    }
}

#[test]
fn search_is_deterministic() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine(&dir, true);
    let a = engine.search("mechanical shifting, rigid", Some(4)).unwrap();
    let b = engine.search("mechanical shifting, rigid", Some(4)).unwrap();
    assert_eq!(a.hits, b.hits);
}

#[test]
fn numeric_and_string_rider_ids_match() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine(&dir, false);
    let result = engine.search("titanium frame dynamo tubeless", Some(1)).unwrap();
    assert_eq!(result.hits[0].rider_id.as_str(), "5");
}

#[test]
fn final_ranking_never_scores_below_baseline() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine(&dir, true);
    let cancel = AtomicBool::new(false);
    let report = engine.evaluate(&queries(), &qrels(), &cancel, None).unwrap();

    assert_eq!(report.per_query.len(), 6);
    let order: Vec<_> = report.per_query.iter().map(|q| q.qid.as_str()).collect();
    assert_eq!(order, vec!["q1", "q2", "q3", "q4", "q5", "q6"]);

    for q in report.per_query.iter().filter(|q| q.status == QueryStatus::Scored) {
        let baseline = q.baseline.as_ref().unwrap();
        let final_hit = q.hitrate_at_k.unwrap();
        let final_mrr = q.mrr_at_k.unwrap();
        let base_hit = baseline.hitrate_at_k.unwrap();
        let base_mrr = baseline.mrr_at_k.unwrap();
        assert!(final_hit >= base_hit, "{} regressed hitrate", q.qid);
        if final_hit == base_hit {
            assert!(final_mrr >= base_mrr - 1e-12, "{} regressed mrr", q.qid);
        }
        for value in [final_hit, final_mrr, q.set_recall_at_k.unwrap(), q.precision_at_k.unwrap()] {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(q.fallback_used, q.final_ranking.used_fallback);
        if q.fallback_used {
            assert_eq!(q.final_ranking.retrieved, baseline.retrieved);
        }
    }

    let q5 = &report.per_query[4];
    assert_eq!(q5.status, QueryStatus::EmptyRelevanceSet);
    let q6 = &report.per_query[5];
    assert_eq!(q6.status, QueryStatus::Unlabeled);
    assert!(q6.mrr_at_k.is_none());
    assert_eq!(report.n_labeled, 4);
}

#[test]
fn without_rerank_final_equals_baseline() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine(&dir, false);
    let cancel = AtomicBool::new(false);
    let report = engine.evaluate(&queries(), &qrels(), &cancel, None).unwrap();

    assert!(!report.apply_rerank);
    assert_eq!(report.summary.n_fallback, 0);
    for q in &report.per_query {
        assert!(!q.fallback_used);
        assert_eq!(q.retrieve_k, q.k);
        if let Some(baseline) = &q.baseline {
            assert_eq!(q.final_ranking.retrieved, baseline.retrieved);
        }
    }
}

#[test]
fn cancelled_run_still_reports() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = engine(&dir, true);
    let cancel = AtomicBool::new(true);
    let seen = AtomicUsize::new(0);
    let progress = |_: &QueryReport| {
        seen.fetch_add(1, Ordering::SeqCst);
    };

    let report = engine
        .evaluate(&queries(), &qrels(), &cancel, Some(&progress))
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 6);
    assert!(report.summary.cancelled);
    assert_eq!(report.summary.n_skipped, 6);
    assert!(report.per_query.iter().all(|q| q.status == QueryStatus::Cancelled));
}

#[test]
fn embedder_dimension_must_match_store() {
    let index: Arc<dyn VectorIndexBackend> = Arc::new(MemoryIndex::default());
    let embedder = LocalHashEmbedder::new(DIM / 2);
    assert_eq!(embedder.dimension(), DIM / 2);
    assert!(BprEngine::with_parts(BprConfig::default(), index, Box::new(embedder)).is_err());
}
