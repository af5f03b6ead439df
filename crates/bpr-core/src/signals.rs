//! Payload signals for the deterministic reranker.
//!
//! A signal is a pure function of a hit payload, the query constraints and a
//! configured weight. It returns `Some(delta)` when it fires and `None`
//! otherwise. Signals are independent: the reranker sums whatever fires and
//! clamps the total, so adding a signal never touches the clamp or sort logic.

use std::collections::BTreeMap;

use crate::constraints::{overlaps_range, tyre_bucket_to_range_mm, QueryConstraints};
use crate::errors::BprError;
use crate::types::Payload;

/// Signature of a signal evaluator.
pub type SignalFn = fn(&Payload, &QueryConstraints, f64) -> Option<f64>;

// ============================================================================
// Payload fields
// ============================================================================

pub const FIELD_TEXT: &str = "text";
pub const FIELD_EVENT_KEY: &str = "event_key";
pub const FIELD_FRAME_TYPE: &str = "frame_type";
pub const FIELD_TYRE_WIDTH: &str = "tyre_width";
pub const FIELD_WHEEL_SIZE: &str = "wheel_size";
pub const FIELD_ELECTRONIC_SHIFTING: &str = "electronic_shifting";

/// Fields the signals read as text.
const TEXT_FIELDS: [&str; 4] = [FIELD_TEXT, FIELD_EVENT_KEY, FIELD_FRAME_TYPE, FIELD_TYRE_WIDTH];

/// Fields whose presence marks a hit as carrying structured data.
const STRUCTURED_FIELDS: [&str; 4] = [
    FIELD_FRAME_TYPE,
    FIELD_WHEEL_SIZE,
    FIELD_TYRE_WIDTH,
    FIELD_ELECTRONIC_SHIFTING,
];

const OTHER_NAV_BRANDS: [&str; 5] = ["wahoo", "hammerhead", "bryton", "karoo", "coros"];
const PUNCTURE_TERMS: [&str; 7] = [
    "tubeless", "sealant", "plugs", "dynaplug", "dart", "cushcore", "inserts",
];
const WIDE_GEARING_TERMS: [&str; 7] = [
    "10-52", "10-50", "11-51", "11-50", "11-46", "11-42", "mullet",
];

/// Lower-cased string field; empty when missing, null, or not a string.
pub fn text_field(payload: &Payload, field: &str) -> String {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// The `electronic_shifting` flag; `None` when missing, null, or unreadable.
pub fn electronic_shifting(payload: &Payload) -> Option<bool> {
    match payload.get(FIELD_ELECTRONIC_SHIFTING)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// Check the fields signals read for the wrong JSON type.
///
/// Missing and null fields are fine; a present field of another type yields a
/// `MalformedPayload` entry and the signals reading it will not fire.
pub fn check_payload(chunk_id: &str, payload: &Payload) -> Vec<BprError> {
    let mut problems = Vec::new();

    for field in TEXT_FIELDS {
        match payload.get(field) {
            None | Some(serde_json::Value::Null) | Some(serde_json::Value::String(_)) => {}
            Some(other) => problems.push(BprError::MalformedPayload {
                chunk_id: chunk_id.to_string(),
                field: field.to_string(),
                reason: format!("expected a string, found {}", json_type(other)),
            }),
        }
    }

    match payload.get(FIELD_ELECTRONIC_SHIFTING) {
        None
        | Some(serde_json::Value::Null)
        | Some(serde_json::Value::Bool(_))
        | Some(serde_json::Value::Number(_)) => {}
        Some(other) => problems.push(BprError::MalformedPayload {
            chunk_id: chunk_id.to_string(),
            field: FIELD_ELECTRONIC_SHIFTING.to_string(),
            reason: format!("expected a boolean, found {}", json_type(other)),
        }),
    }

    problems
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ============================================================================
// Signals
// ============================================================================

fn event_match(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    let hint = c.event_key_hint.as_deref()?;
    text_field(p, FIELD_EVENT_KEY).contains(hint).then_some(w)
}

fn mechanical_ok(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    (c.avoid_electronic && electronic_shifting(p) == Some(false)).then_some(w)
}

fn electronic_violation(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    (c.avoid_electronic && electronic_shifting(p) == Some(true)).then_some(w)
}

fn garmin_ok(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    (c.require_garmin && text_field(p, FIELD_TEXT).contains("garmin")).then_some(w)
}

// Only penalise when the text names a different navigation brand
fn garmin_violation(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    if !c.require_garmin {
        return None;
    }
    let text = text_field(p, FIELD_TEXT);
    (!text.contains("garmin") && OTHER_NAV_BRANDS.iter().any(|b| text.contains(b))).then_some(w)
}

fn wants_rigid(c: &QueryConstraints) -> bool {
    c.avoid_suspension || c.prefer_rigid
}

fn rigid_ok(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    if !wants_rigid(c) {
        return None;
    }
    let frame = text_field(p, FIELD_FRAME_TYPE);
    (!frame.is_empty() && !frame.contains("suspension")).then_some(w)
}

fn suspension_violation(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    (wants_rigid(c) && text_field(p, FIELD_FRAME_TYPE).contains("suspension")).then_some(w)
}

/// Overlap between the requested mm range and the payload bucket, if both are known.
fn tyre_overlap(p: &Payload, c: &QueryConstraints) -> Option<bool> {
    if !c.has_tyre_range_mm() {
        return None;
    }
    let (t_min, t_max) = tyre_bucket_to_range_mm(&text_field(p, FIELD_TYRE_WIDTH));
    if t_min.is_none() && t_max.is_none() {
        return None;
    }
    Some(overlaps_range(c.tyre_min_mm, c.tyre_max_mm, t_min, t_max))
}

fn tyre_match(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    tyre_overlap(p, c)?.then_some(w)
}

fn tyre_mismatch(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    (!tyre_overlap(p, c)?).then_some(w)
}

fn puncture_terms(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    if !c.prioritize_puncture {
        return None;
    }
    let text = text_field(p, FIELD_TEXT);
    PUNCTURE_TERMS.iter().any(|t| text.contains(t)).then_some(w)
}

fn wide_gearing_terms(p: &Payload, c: &QueryConstraints, w: f64) -> Option<f64> {
    if !c.need_wide_gearing {
        return None;
    }
    let text = text_field(p, FIELD_TEXT);
    WIDE_GEARING_TERMS.iter().any(|t| text.contains(t)).then_some(w)
}

fn has_structured(p: &Payload, _c: &QueryConstraints, w: f64) -> Option<f64> {
    STRUCTURED_FIELDS
        .iter()
        .any(|f| p.get(*f).is_some_and(is_truthy))
        .then_some(w)
}

// ============================================================================
// Registry
// ============================================================================

/// Default signals with their weights, in evaluation order.
pub const DEFAULT_SIGNALS: [(&str, f64, SignalFn); 12] = [
    ("event_match", 0.02, event_match),
    ("mechanical_ok", 0.02, mechanical_ok),
    ("electronic_violation", -0.02, electronic_violation),
    ("garmin_ok", 0.02, garmin_ok),
    ("garmin_violation", -0.02, garmin_violation),
    ("rigid_ok", 0.01, rigid_ok),
    ("suspension_violation", -0.02, suspension_violation),
    ("tyre_match", 0.02, tyre_match),
    ("tyre_mismatch", -0.02, tyre_mismatch),
    ("puncture_terms", 0.01, puncture_terms),
    ("wide_gearing_terms", 0.01, wide_gearing_terms),
    ("has_structured", 0.005, has_structured),
];

/// Default weights keyed by signal name.
pub fn default_weights() -> BTreeMap<String, f64> {
    DEFAULT_SIGNALS
        .iter()
        .map(|(name, weight, _)| (name.to_string(), *weight))
        .collect()
}

/// A named signal with its weight.
#[derive(Clone)]
pub struct Signal {
    pub name: String,
    pub weight: f64,
    pub eval: SignalFn,
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Ordered mapping from signal name to evaluator and weight.
#[derive(Debug, Clone, Default)]
pub struct SignalRegistry {
    signals: Vec<Signal>,
}

impl SignalRegistry {
    /// A registry with no signals; every hit gets a zero boost.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default signal set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (name, weight, eval) in DEFAULT_SIGNALS {
            registry.register(name, weight, eval);
        }
        registry
    }

    /// The default signal set with weights overridden by name.
    ///
    /// Returns the names in `weights` that match no registered signal.
    pub fn with_weights(weights: &BTreeMap<String, f64>) -> (Self, Vec<String>) {
        let mut registry = Self::with_defaults();
        let unknown = weights
            .iter()
            .filter(|(name, weight)| !registry.set_weight(name, **weight))
            .map(|(name, _)| name.clone())
            .collect();
        (registry, unknown)
    }

    /// Register a signal, replacing any signal of the same name in place.
    pub fn register(&mut self, name: impl Into<String>, weight: f64, eval: SignalFn) {
        let name = name.into();
        let signal = Signal { name, weight, eval };
        match self.signals.iter_mut().find(|s| s.name == signal.name) {
            Some(existing) => *existing = signal,
            None => self.signals.push(signal),
        }
    }

    /// Change the weight of a registered signal. Returns false if unknown.
    pub fn set_weight(&mut self, name: &str, weight: f64) -> bool {
        match self.signals.iter_mut().find(|s| s.name == name) {
            Some(signal) => {
                signal.weight = weight;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Evaluate every signal; returns the deltas of those that fired.
    pub fn evaluate(&self, payload: &Payload, constraints: &QueryConstraints) -> BTreeMap<String, f64> {
        self.signals
            .iter()
            .filter_map(|s| (s.eval)(payload, constraints, s.weight).map(|d| (s.name.clone(), d)))
            .collect()
    }
}
