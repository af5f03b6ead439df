//! Query constraint parsing.
//!
//! Constraints are derived from the lower-cased query text with keyword and
//! pattern heuristics. The reranker matches them against hit payloads; the
//! parser never fails, an unrecognised query simply yields no constraints.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TYRE_MM_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})\s*[-–]\s*(\d{2})\s*mm").expect("Invalid regex"));
static TYRE_MM_MIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})\s*mm\+").expect("Invalid regex"));
static TYRE_INCH_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\d(?:\.\d)?)\s*[-–]\s*(\d(?:\.\d)?)\s*['"]"#).expect("Invalid regex")
});

static BUCKET_MM_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})\s*mm\s*-\s*(\d{2})\s*mm").expect("Invalid regex"));
static BUCKET_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})\s*-\s*(\d{2})\s*mm").expect("Invalid regex"));
static BUCKET_SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})\s*mm").expect("Invalid regex"));

/// Constraints derived from a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConstraints {
    pub require_mechanical: bool,
    pub avoid_electronic: bool,
    pub require_garmin: bool,
    pub avoid_suspension: bool,
    pub prefer_rigid: bool,

    /// Requested tyre width in millimetres. `tyre_max_mm = None` with a minimum
    /// set means "at least".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tyre_min_mm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tyre_max_mm: Option<u32>,

    /// Requested MTB tyre width in inches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tyre_min_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tyre_max_in: Option<f64>,

    /// Substring expected in the payload `event_key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_key_hint: Option<String>,

    pub prioritize_puncture: bool,
    pub need_wide_gearing: bool,
}

impl QueryConstraints {
    /// Whether a millimetre tyre range was requested.
    pub fn has_tyre_range_mm(&self) -> bool {
        self.tyre_min_mm.is_some() || self.tyre_max_mm.is_some()
    }

    /// Whether no constraint at all was derived.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Derive constraints from free query text.
pub fn parse_constraints(query: &str) -> QueryConstraints {
    let q = query.to_lowercase();

    let require_mechanical = contains_any(&q, &["mechanical shifting", "mechanical only"]);
    let avoid_electronic =
        require_mechanical || contains_any(&q, &["avoid electronic", "no electronic"]);
    let require_garmin = contains_any(&q, &["garmin only", "navigation: garmin", "nav: garmin"]);
    let avoid_suspension = contains_any(&q, &["avoid suspension", "no suspension"]);
    let prefer_rigid = avoid_suspension || q.contains("rigid");
    let prioritize_puncture = contains_any(&q, &["puncture", "flat"]);
    let need_wide_gearing =
        contains_any(&q, &["wide range gearing", "steep climbs", "wide gear range"]);

    let (tyre_min_mm, tyre_max_mm) = if let Some(caps) = TYRE_MM_RANGE_RE.captures(&q) {
        (caps[1].parse().ok(), caps[2].parse().ok())
    } else if let Some(caps) = TYRE_MM_MIN_RE.captures(&q) {
        (caps[1].parse().ok(), None)
    } else {
        (None, None)
    };

    let (tyre_min_in, tyre_max_in) = match TYRE_INCH_RANGE_RE.captures(&q) {
        Some(caps) => (caps[1].parse().ok(), caps[2].parse().ok()),
        None => (None, None),
    };

    let event_key_hint = if q.contains("transcontinental") || q.contains("tcr") {
        Some("transcontinental".to_string())
    } else if q.contains("gb duro") || q.contains("gbduro") {
        Some("gbd".to_string())
    } else {
        None
    };

    QueryConstraints {
        require_mechanical,
        avoid_electronic,
        require_garmin,
        avoid_suspension,
        prefer_rigid,
        tyre_min_mm,
        tyre_max_mm,
        tyre_min_in,
        tyre_max_in,
        event_key_hint,
        prioritize_puncture,
        need_wide_gearing,
    }
}

/// Millimetre range of a payload tyre bucket such as `"45mm+"`, `"40-45mm"` or `"38mm"`.
///
/// Returns `(None, None)` when the bucket cannot be read.
pub fn tyre_bucket_to_range_mm(bucket: &str) -> (Option<u32>, Option<u32>) {
    let s = bucket.trim().to_lowercase();
    if s.is_empty() {
        return (None, None);
    }

    if let Some(prefix) = s.strip_suffix("mm+") {
        return match prefix.trim().parse() {
            Ok(v) => (Some(v), None),
            Err(_) => (None, None),
        };
    }

    for re in [&*BUCKET_MM_PAIR_RE, &*BUCKET_RANGE_RE] {
        if let Some(caps) = re.captures(&s) {
            return (caps[1].parse().ok(), caps[2].parse().ok());
        }
    }

    if let Some(caps) = BUCKET_SINGLE_RE.captures(&s) {
        let v = caps[1].parse().ok();
        return (v, v);
    }

    (None, None)
}

/// Whether two possibly open ranges overlap.
///
/// A range with both bounds unknown overlaps everything; a single missing
/// bound is open-ended.
pub fn overlaps_range(
    a_min: Option<u32>,
    a_max: Option<u32>,
    b_min: Option<u32>,
    b_max: Option<u32>,
) -> bool {
    if (a_min.is_none() && a_max.is_none()) || (b_min.is_none() && b_max.is_none()) {
        return true;
    }
    let lo1 = a_min.unwrap_or(u32::MIN);
    let hi1 = a_max.unwrap_or(u32::MAX);
    let lo2 = b_min.unwrap_or(u32::MIN);
    let hi2 = b_max.unwrap_or(u32::MAX);
    !(hi1 < lo2 || hi2 < lo1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_constraints() {
        let c = parse_constraints("Mechanical shifting only, Garmin only, avoid suspension");
        assert!(c.require_mechanical);
        assert!(c.avoid_electronic);
        assert!(c.require_garmin);
        assert!(c.avoid_suspension);
        assert!(c.prefer_rigid);
        assert!(!c.prioritize_puncture);
    }

    #[test]
    fn test_intent_hints() {
        let c = parse_constraints("worried about flats, need wide range gearing for steep climbs");
        assert!(c.prioritize_puncture);
        assert!(c.need_wide_gearing);
        assert!(!c.avoid_electronic);
    }

    #[test]
    fn test_tyre_mm_range() {
        let c = parse_constraints("tyres 40–50mm please");
        assert_eq!((c.tyre_min_mm, c.tyre_max_mm), (Some(40), Some(50)));

        let c = parse_constraints("at least 45mm+ tyres");
        assert_eq!((c.tyre_min_mm, c.tyre_max_mm), (Some(45), None));
        assert!(c.has_tyre_range_mm());
    }

    #[test]
    fn test_tyre_inch_range() {
        let c = parse_constraints(r#"2.1-2.4" tyres on a hardtail"#);
        assert_eq!(c.tyre_min_in, Some(2.1));
        assert_eq!(c.tyre_max_in, Some(2.4));
        assert!(!c.has_tyre_range_mm());
    }

    #[test]
    fn test_event_hint() {
        assert_eq!(
            parse_constraints("TCR setup").event_key_hint.as_deref(),
            Some("transcontinental")
        );
        assert_eq!(
            parse_constraints("GB Duro bikes").event_key_hint.as_deref(),
            Some("gbd")
        );
        assert!(parse_constraints("Tour Divide").event_key_hint.is_none());
    }

    #[test]
    fn test_empty_query_has_no_constraints() {
        assert!(parse_constraints("").is_empty());
        assert!(parse_constraints("what do people ride").is_empty());
    }

    #[test]
    fn test_tyre_buckets() {
        assert_eq!(tyre_bucket_to_range_mm("45mm+"), (Some(45), None));
        assert_eq!(tyre_bucket_to_range_mm("40mm - 45mm"), (Some(40), Some(45)));
        assert_eq!(tyre_bucket_to_range_mm("35-40mm"), (Some(35), Some(40)));
        assert_eq!(tyre_bucket_to_range_mm("38mm"), (Some(38), Some(38)));
        assert_eq!(tyre_bucket_to_range_mm("2.2\""), (None, None));
        assert_eq!(tyre_bucket_to_range_mm(""), (None, None));
        assert_eq!(tyre_bucket_to_range_mm("widemm+"), (None, None));
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps_range(Some(40), Some(50), Some(45), None));
        assert!(!overlaps_range(Some(40), Some(45), Some(50), Some(55)));
        assert!(overlaps_range(None, None, Some(1), Some(2)));
        assert!(overlaps_range(Some(45), None, Some(30), Some(45)));
        assert!(!overlaps_range(Some(46), None, Some(30), Some(45)));
    }
}
