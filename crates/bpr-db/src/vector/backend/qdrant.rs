//! Qdrant REST backend.
//!
//! Talks to a Qdrant collection over its HTTP API with a blocking client. Each
//! evaluation worker issues its own requests; `reqwest::blocking::Client`
//! pools connections internally and is safe to share between threads.

use super::super::config::VectorIndexConfig;
use super::super::metadata::VectorSearchFilter;
use super::super::traits::{
    VectorId, VectorIndexBackend, VectorInsert, VectorMetric, VectorSearchResult,
};
use crate::error::{DbError, DbResult};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Header carrying the Qdrant API key.
const API_KEY_HEADER: &str = "api-key";

// ============================================================================
// Wire types
// ============================================================================

/// Envelope wrapping every Qdrant response.
#[derive(Debug, Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    with_vector: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PointStruct<'a> {
    id: u64,
    vector: &'a [f32],
    payload: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    points: Vec<PointStruct<'a>>,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

/// Convert a Qdrant point id (integer or UUID string) into a [`VectorId`].
fn point_id(value: &serde_json::Value) -> Option<VectorId> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(VectorId::new),
        serde_json::Value::String(s) => Some(VectorId::from_key(s)),
        _ => None,
    }
}

// ============================================================================
// QdrantVectorIndex
// ============================================================================

/// Vector index backed by a Qdrant collection.
pub struct QdrantVectorIndex {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dimension: usize,
    metric: VectorMetric,
}

impl QdrantVectorIndex {
    /// Connect to the collection described by `config`.
    ///
    /// When `create_if_missing` is set the collection is created (or its
    /// dimension verified); otherwise no request is made until the first query.
    pub fn open(config: &VectorIndexConfig) -> DbResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DbError::config(format!("Failed to build HTTP client: {}", e)))?;

        let index = Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            dimension: config.dimension,
            metric: config.metric,
        };

        debug!(
            "Opening QdrantVectorIndex {} at {}",
            index.collection, index.base_url
        );

        if config.create_if_missing {
            index.ensure_collection()?;
        }

        Ok(index)
    }

    fn collection_url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/collections/{}", self.base_url, self.collection)
        } else {
            format!("{}/collections/{}/{}", self.base_url, self.collection, suffix)
        }
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    /// Send a request and decode the `result` field of the envelope.
    fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, url: &str) -> DbResult<T> {
        let response = self
            .with_auth(builder)
            .send()
            .map_err(|e| DbError::unreachable(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DbError::RemoteStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: QdrantEnvelope<T> = response
            .json()
            .map_err(|e| DbError::malformed_response(url, e.to_string()))?;
        Ok(envelope.result)
    }

    /// Create the collection if it does not exist, or verify its dimension.
    fn ensure_collection(&self) -> DbResult<()> {
        let url = self.collection_url("");
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .map_err(|e| DbError::unreachable(&url, e.to_string()))?;

        if response.status().as_u16() == 404 {
            info!(
                "Creating Qdrant collection {} (size={}, distance={})",
                self.collection,
                self.dimension,
                self.metric.qdrant_distance()
            );
            let body = serde_json::json!({
                "vectors": {
                    "size": self.dimension,
                    "distance": self.metric.qdrant_distance(),
                }
            });
            let _: serde_json::Value = self.send(self.client.put(&url).json(&body), &url)?;
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(DbError::RemoteStatus { url, status, body });
        }

        let info: QdrantEnvelope<serde_json::Value> = response
            .json()
            .map_err(|e| DbError::malformed_response(&url, e.to_string()))?;
        if let Some(size) = info
            .result
            .pointer("/config/params/vectors/size")
            .and_then(|v| v.as_u64())
        {
            if size as usize != self.dimension {
                return Err(DbError::DimensionMismatch {
                    expected: self.dimension,
                    actual: size as usize,
                });
            }
        }

        Ok(())
    }
}

impl VectorIndexBackend for QdrantVectorIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&VectorSearchFilter>,
    ) -> DbResult<Vec<VectorSearchResult>> {
        let url = self.collection_url("points/search");
        trace!("Qdrant search {} limit={}", url, limit);

        let request = SearchRequest {
            vector: embedding,
            limit,
            with_payload: true,
            with_vector: false,
            filter: filter.and_then(|f| f.to_qdrant_filter()),
        };

        let points: Vec<ScoredPoint> = self.send(self.client.post(&url).json(&request), &url)?;

        points
            .into_iter()
            .map(|p| {
                let id = point_id(&p.id).ok_or_else(|| {
                    DbError::malformed_response(&url, format!("unsupported point id {}", p.id))
                })?;
                Ok(VectorSearchResult::new(
                    id,
                    p.score,
                    p.payload.unwrap_or_else(|| serde_json::json!({})),
                ))
            })
            .collect()
    }

    fn upsert(&self, vectors: &[VectorInsert]) -> DbResult<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        for insert in vectors {
            if insert.vector.len() != self.dimension {
                return Err(DbError::DimensionMismatch {
                    expected: self.dimension,
                    actual: insert.vector.len(),
                });
            }
        }

        let url = format!("{}?wait=true", self.collection_url("points"));
        debug!("Upserting {} points into {}", vectors.len(), self.collection);

        let request = UpsertRequest {
            points: vectors
                .iter()
                .map(|v| PointStruct {
                    id: v.id.value(),
                    vector: &v.vector,
                    payload: &v.payload,
                })
                .collect(),
        };
        let _: serde_json::Value = self.send(self.client.put(&url).json(&request), &url)?;
        Ok(())
    }

    fn delete(&self, ids: &[VectorId]) -> DbResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}?wait=true", self.collection_url("points/delete"));
        let body = serde_json::json!({
            "points": ids.iter().map(|id| id.value()).collect::<Vec<_>>()
        });
        let _: serde_json::Value = self.send(self.client.post(&url).json(&body), &url)?;
        Ok(())
    }

    fn flush(&self) -> DbResult<()> {
        // Writes are issued with wait=true
        Ok(())
    }

    fn len(&self) -> DbResult<usize> {
        let url = self.collection_url("points/count");
        let body = serde_json::json!({ "exact": true });
        let result: CountResult = self.send(self.client.post(&url).json(&body), &url)?;
        Ok(result.count)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> VectorMetric {
        self.metric
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offline_index() -> QdrantVectorIndex {
        // Port 1 is never listening; open() makes no request without create_if_missing
        let config = VectorIndexConfig::new(3, "/unused")
            .with_backend("qdrant")
            .with_remote("http://127.0.0.1:1/", "riders")
            .with_create_if_missing(false);
        QdrantVectorIndex::open(&config).unwrap()
    }

    #[test]
    fn test_point_id_conversion() {
        assert_eq!(point_id(&json!(17)), Some(VectorId::new(17)));
        let uuid = "5c56c793-69f3-4fbf-87e6-c4bf54c28c26";
        assert_eq!(point_id(&json!(uuid)), Some(VectorId::from_key(uuid)));
        assert_eq!(point_id(&json!(-3)), None);
        assert_eq!(point_id(&json!(null)), None);
    }

    #[test]
    fn test_collection_urls() {
        let index = offline_index();
        assert_eq!(index.collection_url(""), "http://127.0.0.1:1/collections/riders");
        assert_eq!(
            index.collection_url("points/search"),
            "http://127.0.0.1:1/collections/riders/points/search"
        );
    }

    #[test]
    fn test_search_envelope_decoding() {
        let body = json!({
            "result": [
                {"id": 4, "version": 1, "score": 0.91, "payload": {"rider_id": 12, "text": "tubeless"}},
                {"id": 9, "version": 1, "score": 0.80}
            ],
            "status": "ok",
            "time": 0.002
        });
        let envelope: QdrantEnvelope<Vec<ScoredPoint>> = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.result.len(), 2);
        assert_eq!(envelope.result[0].payload.as_ref().unwrap()["rider_id"], 12);
        assert!(envelope.result[1].payload.is_none());
    }

    #[test]
    fn test_search_request_serialization() {
        let filter = VectorSearchFilter::new().with_event_key("tcr");
        let request = SearchRequest {
            vector: &[0.1, 0.2],
            limit: 50,
            with_payload: true,
            with_vector: false,
            filter: filter.to_qdrant_filter(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["limit"], 50);
        assert_eq!(value["with_payload"], true);
        assert_eq!(value["filter"]["must"][0]["key"], "event_key");
    }

    #[test]
    fn test_unreachable_store_is_unavailable() {
        let index = offline_index();
        let err = index.query(&[0.0, 1.0, 0.0], 5, None).unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");
    }
}
