//! Payload field names and search filters.

use serde::{Deserialize, Serialize};

// ============================================================================
// Payload Field Constants
// ============================================================================

/// Rider identifier; the deduplication key.
pub const FIELD_RIDER_ID: &str = "rider_id";

/// Textual chunk key.
pub const FIELD_CHUNK_ID: &str = "chunk_id";

/// Position of the chunk within the rider's record.
pub const FIELD_CHUNK_INDEX: &str = "chunk_index";

/// Chunk text.
pub const FIELD_TEXT: &str = "text";

/// Event identifier (e.g. "transcontinental-2024").
pub const FIELD_EVENT_KEY: &str = "event_key";

// ============================================================================
// VectorSearchFilter
// ============================================================================

/// Filter criteria for chunk searches.
///
/// Fields are combined with AND logic; empty fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchFilter {
    /// Only chunks whose `event_key` equals this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,

    /// Only chunks belonging to one of these riders.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rider_ids: Vec<String>,
}

impl VectorSearchFilter {
    /// Create an empty filter (matches all).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event key.
    pub fn with_event_key(mut self, event_key: impl Into<String>) -> Self {
        self.event_key = Some(event_key.into());
        self
    }

    /// Restrict to a set of riders.
    pub fn with_rider_ids(mut self, rider_ids: Vec<String>) -> Self {
        self.rider_ids = rider_ids;
        self
    }

    /// Check if the filter is empty (matches all).
    pub fn is_empty(&self) -> bool {
        self.event_key.is_none() && self.rider_ids.is_empty()
    }

    /// Evaluate the filter against a chunk payload.
    ///
    /// Rider ids stored as JSON numbers compare by their decimal rendering.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        if let Some(ref event_key) = self.event_key {
            match payload.get(FIELD_EVENT_KEY).and_then(|v| v.as_str()) {
                Some(value) if value == event_key => {}
                _ => return false,
            }
        }

        if !self.rider_ids.is_empty() {
            let rider = match payload.get(FIELD_RIDER_ID) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => return false,
            };
            if !self.rider_ids.contains(&rider) {
                return false;
            }
        }

        true
    }

    /// Build a Qdrant filter clause.
    ///
    /// Returns `None` if the filter is empty.
    pub fn to_qdrant_filter(&self) -> Option<serde_json::Value> {
        let mut must: Vec<serde_json::Value> = Vec::new();

        if let Some(event_key) = &self.event_key {
            must.push(serde_json::json!({
                "key": FIELD_EVENT_KEY,
                "match": { "value": event_key }
            }));
        }

        if !self.rider_ids.is_empty() {
            must.push(serde_json::json!({
                "key": FIELD_RIDER_ID,
                "match": { "any": self.rider_ids }
            }));
        }

        if must.is_empty() {
            None
        } else {
            Some(serde_json::json!({ "must": must }))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = VectorSearchFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&json!({})));
        assert!(filter.to_qdrant_filter().is_none());
    }

    #[test]
    fn test_event_key_filter() {
        let filter = VectorSearchFilter::new().with_event_key("gbduro-2023");
        assert!(filter.matches(&json!({"event_key": "gbduro-2023"})));
        assert!(!filter.matches(&json!({"event_key": "tcr-2023"})));
        assert!(!filter.matches(&json!({"rider_id": "r1"})));
    }

    #[test]
    fn test_rider_filter_accepts_numeric_ids() {
        let filter = VectorSearchFilter::new().with_rider_ids(vec!["42".to_string()]);
        assert!(filter.matches(&json!({"rider_id": 42})));
        assert!(filter.matches(&json!({"rider_id": "42"})));
        assert!(!filter.matches(&json!({"rider_id": 7})));
    }

    #[test]
    fn test_qdrant_filter_shape() {
        let filter = VectorSearchFilter::new()
            .with_event_key("tcr")
            .with_rider_ids(vec!["a".to_string(), "b".to_string()]);
        let clause = filter.to_qdrant_filter().unwrap();
        let must = clause["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "event_key");
        assert_eq!(must[0]["match"]["value"], "tcr");
        assert_eq!(must[1]["match"]["any"], json!(["a", "b"]));
    }
}
