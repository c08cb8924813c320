//! Label-set and confidence-range filtering for image retrieval.
//!
//! Range specs use the bin scale of the dashboard slider: `"40-45,50,90-100"`
//! selects bins 40 through 45, bin 50, and bins 90 through 100.

pub mod builder;

use serde::Serialize;
use std::num::IntErrorKind;

use crate::error::{Error, Result};
use crate::histogram::MAX_BIN;

pub use builder::{Dialect, QueryBuilder, SqlValue};

/// Largest page the API hands out regardless of configuration.
pub const MAX_LIMIT: i64 = 500;

/// Page size used when the caller gives none.
pub const DEFAULT_LIMIT: i64 = 50;

/// Half-open confidence interval `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceRange {
    pub low: f64,
    pub high: f64,
}

impl ConfidenceRange {
    /// Interval covering bins `lo..=hi`, after clamping and ordering them.
    pub fn from_bins(lo: i64, hi: i64) -> Self {
        let clamp = |bin: i64| bin.clamp(0, MAX_BIN as i64);
        let (mut lo, mut hi) = (clamp(lo), clamp(hi));
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        Self {
            low: lo as f64 / 100.0,
            high: ((hi + 1) as f64 / 100.0).min(1.0),
        }
    }

    pub fn contains(&self, confidence: f64) -> bool {
        confidence >= self.low && confidence < self.high
    }
}

/// Parse a comma-separated range spec.
///
/// Returns `Ok(None)` when `spec` holds no terms, meaning "no filter".
/// Blank terms are skipped; anything else that is not an integer or an
/// integer pair is rejected.
pub fn parse_ranges(spec: &str) -> Result<Option<Vec<ConfidenceRange>>> {
    let mut ranges = Vec::new();
    for term in spec.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let (lo, hi) = match term.split_once('-') {
            Some((lo, hi)) => (parse_bin(lo, term)?, parse_bin(hi, term)?),
            None => {
                let bin = parse_bin(term, term)?;
                (bin, bin)
            }
        };
        ranges.push(ConfidenceRange::from_bins(lo, hi));
    }
    Ok(if ranges.is_empty() { None } else { Some(ranges) })
}

/// Digit strings too large for `i64` saturate; `from_bins` clamps them anyway.
fn parse_bin(value: &str, term: &str) -> Result<i64> {
    match value.trim().parse::<i64>() {
        Ok(bin) => Ok(bin),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Ok(i64::MAX),
        Err(e) if *e.kind() == IntErrorKind::NegOverflow => Ok(i64::MIN),
        Err(_) => Err(Error::MalformedRange {
            term: term.to_string(),
        }),
    }
}

/// Structured predicate over the detection table.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Detection label is one of these (deduplicated, order kept).
    LabelSet(Vec<String>),
    /// Detection confidence falls in any of these intervals.
    ConfidenceRanges(Vec<ConfidenceRange>),
}

impl Predicate {
    pub fn label_set<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::LabelSet(unique_labels(labels.into_iter().map(Into::into)))
    }
}

fn unique_labels(labels: impl Iterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for label in labels {
        if !unique.contains(&label) {
            unique.push(label);
        }
    }
    unique
}

/// One page request against the image index.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageQuery {
    /// Every one of these labels must be present; empty means "latest images".
    pub labels: Vec<String>,
    /// Qualifying confidences; `None` accepts any confidence.
    pub ranges: Option<Vec<ConfidenceRange>>,
    pub limit: i64,
    pub offset: i64,
}

impl ImageQuery {
    /// Build a query with `limit` clamped to `[1, max_limit]` and `offset` to `>= 0`.
    pub fn new(
        labels: Vec<String>,
        ranges: Option<Vec<ConfidenceRange>>,
        limit: i64,
        offset: i64,
        max_limit: i64,
    ) -> Self {
        Self {
            labels: unique_labels(
                labels.into_iter().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            ),
            ranges: ranges.filter(|r| !r.is_empty()),
            limit: limit.clamp(1, max_limit.clamp(1, MAX_LIMIT)),
            offset: offset.max(0),
        }
    }

    /// Predicates applied to detections, in the order they are rendered.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = vec![Predicate::LabelSet(self.labels.clone())];
        if let Some(ranges) = &self.ranges {
            predicates.push(Predicate::ConfidenceRanges(ranges.clone()));
        }
        predicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn assert_ranges(actual: &[ConfidenceRange], expected: &[(f64, f64)]) {
        assert_eq!(actual.len(), expected.len());
        for (range, (low, high)) in actual.iter().zip(expected) {
            assert!(approx(range.low, *low), "{range:?} vs {low}");
            assert!(approx(range.high, *high), "{range:?} vs {high}");
        }
    }

    #[test]
    fn test_parse_ranges_mixed_terms() {
        let ranges = parse_ranges("40-45,50,90-100").unwrap().unwrap();
        assert_ranges(&ranges, &[(0.40, 0.46), (0.50, 0.51), (0.90, 1.0)]);
    }

    #[test]
    fn test_parse_ranges_empty_is_no_filter() {
        assert_eq!(parse_ranges("").unwrap(), None);
        assert_eq!(parse_ranges(" , ,").unwrap(), None);
    }

    #[test]
    fn test_parse_ranges_clamps_and_swaps() {
        let ranges = parse_ranges("60-50, 150").unwrap().unwrap();
        assert_ranges(&ranges, &[(0.50, 0.61), (1.0, 1.0)]);
    }

    #[test]
    fn test_parse_ranges_saturates_huge_bins() {
        let ranges = parse_ranges("90-99999999999999999999").unwrap().unwrap();
        assert_ranges(&ranges, &[(0.90, 1.0)]);
        let ranges = parse_ranges("123456789012345678901234567890").unwrap().unwrap();
        assert_ranges(&ranges, &[(1.0, 1.0)]);
    }

    #[test]
    fn test_parse_ranges_rejects_garbage() {
        match parse_ranges("40-4x") {
            Err(Error::MalformedRange { term }) => assert_eq!(term, "40-4x"),
            other => panic!("expected malformed range, got {other:?}"),
        }
        assert!(parse_ranges("abc").is_err());
        assert!(parse_ranges("0.5").is_err());
        assert!(parse_ranges("10-20-30").is_err());
        assert!(parse_ranges("-5").is_err());
    }

    #[test]
    fn test_range_contains_is_half_open() {
        let range = ConfidenceRange::from_bins(40, 45);
        assert!(range.contains(0.40));
        assert!(range.contains(0.4599));
        assert!(!range.contains(0.46));
        assert!(!range.contains(0.39));
    }

    #[test]
    fn test_image_query_clamps_paging() {
        let query = ImageQuery::new(vec![], None, 0, -10, MAX_LIMIT);
        assert_eq!(query.limit, 1);
        assert_eq!(query.offset, 0);
        let query = ImageQuery::new(vec![], None, 10_000, 5, MAX_LIMIT);
        assert_eq!(query.limit, 500);
        assert_eq!(query.offset, 5);
        let query = ImageQuery::new(vec![], None, 10_000, 0, 100);
        assert_eq!(query.limit, 100);
    }

    #[test]
    fn test_image_query_dedups_labels() {
        let labels = vec!["cat".into(), " dog ".into(), "cat".into(), "  ".into()];
        let query = ImageQuery::new(labels, Some(vec![]), 10, 0, MAX_LIMIT);
        assert_eq!(query.labels, vec!["cat".to_string(), "dog".to_string()]);
        assert_eq!(query.ranges, None);
    }
}
