//! Precomputed confidence histograms and the values read back from them.
//!
//! Two aggregate tables back every threshold query:
//!
//! * `yfcc_label_conf_hist` holds `box_count` per `(label, conf_bin)`.
//! * `yfcc_images_maxbin_hist` holds `image_count` per `max_bin`, the bin of
//!   each image's highest-confidence detection.
//!
//! Summing either table from a threshold bin upward answers "how many boxes"
//! or "how many images" in at most 101 rows, whatever the corpus size. An
//! image's maximum is at or above the threshold exactly when one of its
//! detections is, so the image count is exact.

pub mod bins;

use serde::Serialize;
use std::time::Duration;

use crate::labels::LABELS;

pub use bins::{build_bin, normalize_min_conf, query_bin, BIN_COUNT, MAX_BIN};

/// Box count of one vocabulary label at a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub label: &'static str,
    pub count: u64,
}

/// Per-label box counts at or above a threshold bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCounts {
    /// One entry per vocabulary label, in vocabulary order.
    pub counts: Vec<LabelCount>,
    pub total_boxes: u64,
    /// Unix seconds of the last rebuild, 0 when never rebuilt.
    pub updated_at: i64,
}

impl LabelCounts {
    /// Counts for an empty or never-built histogram.
    pub fn empty() -> Self {
        Self::from_rows(Vec::new(), 0)
    }

    /// Assemble counts from `(label, summed box_count)` rows.
    ///
    /// Labels outside the vocabulary are ignored; vocabulary labels without a
    /// row report 0.
    pub fn from_rows(rows: Vec<(String, i64)>, updated_at: i64) -> Self {
        let mut counts: Vec<LabelCount> = LABELS
            .iter()
            .map(|&label| LabelCount { label, count: 0 })
            .collect();
        for (label, count) in rows {
            if let Some(entry) = counts.iter_mut().find(|c| c.label == label) {
                entry.count = count.max(0) as u64;
            }
        }
        let total_boxes = counts.iter().map(|c| c.count).sum();
        Self {
            counts,
            total_boxes,
            updated_at,
        }
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Share of all counted boxes carrying `label`.
    pub fn fraction(&self, label: &str) -> f64 {
        fraction(self.get(label), self.total_boxes)
    }
}

/// `count / total`, or 0 when there is nothing to divide by.
pub fn fraction(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Everything the dashboard shows for one threshold, read from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSummary {
    /// Threshold after rounding to two decimals and clamping.
    pub min_conf: f64,
    pub threshold_bin: u8,
    pub label_counts: LabelCounts,
    pub images_at_or_above: u64,
    pub total_images: u64,
}

impl ThresholdSummary {
    pub fn empty(min_conf: f64) -> Self {
        Self {
            min_conf: normalize_min_conf(min_conf),
            threshold_bin: query_bin(min_conf),
            label_counts: LabelCounts::empty(),
            images_at_or_above: 0,
            total_images: 0,
        }
    }
}

/// Rows written by one histogram rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildCounts {
    pub label_bins: u64,
    pub max_bins: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RebuildReport {
    pub updated_at: i64,
    pub counts: RebuildCounts,
    pub elapsed: Duration,
}

/// Full contents of both aggregate tables, ordered by key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistogramContents {
    pub label_bins: Vec<(String, u8, u64)>,
    pub max_bins: Vec<(u8, u64)>,
    pub updated_at: i64,
}

impl HistogramContents {
    pub fn total_boxes(&self) -> u64 {
        self.label_bins.iter().map(|(_, _, count)| count).sum()
    }

    pub fn total_images(&self) -> u64 {
        self.max_bins.iter().map(|(_, count)| count).sum()
    }
}

/// Number of images for one confidence bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BinCount {
    pub bin: u8,
    pub image_count: u64,
}

/// Expand sparse `(bin, count)` rows to all 101 bins, dropping out-of-range bins.
pub fn dense_bins(rows: Vec<(i64, i64)>) -> Vec<BinCount> {
    let mut bins: Vec<BinCount> = (0..=MAX_BIN)
        .map(|bin| BinCount { bin, image_count: 0 })
        .collect();
    for (bin, count) in rows {
        if (0..=MAX_BIN as i64).contains(&bin) {
            bins[bin as usize].image_count = count.max(0) as u64;
        }
    }
    bins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_counts_fill_vocabulary() {
        let counts = LabelCounts::from_rows(
            vec![("cat".to_string(), 3), ("dog".to_string(), 1), ("unicorn".to_string(), 9)],
            1700000000,
        );
        assert_eq!(counts.counts.len(), LABELS.len());
        assert_eq!(counts.get("cat"), 3);
        assert_eq!(counts.get("person"), 0);
        assert_eq!(counts.get("unicorn"), 0);
        assert_eq!(counts.total_boxes, 4);
        assert_eq!(counts.updated_at, 1700000000);
        assert!((counts.fraction("cat") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_fraction_guards_zero_total() {
        assert_eq!(fraction(0, 0), 0.0);
        assert_eq!(LabelCounts::empty().fraction("cat"), 0.0);
        assert_eq!(LabelCounts::empty().updated_at, 0);
    }

    #[test]
    fn test_dense_bins() {
        let bins = dense_bins(vec![(0, 2), (45, 7), (100, 1), (101, 5), (-1, 5)]);
        assert_eq!(bins.len(), BIN_COUNT);
        assert_eq!(bins[0].image_count, 2);
        assert_eq!(bins[45], BinCount { bin: 45, image_count: 7 });
        assert_eq!(bins[100].image_count, 1);
        assert_eq!(bins.iter().map(|b| b.image_count).sum::<u64>(), 10);
    }

    #[test]
    fn test_empty_summary_normalizes_threshold() {
        let summary = ThresholdSummary::empty(0.456);
        assert_eq!(summary.threshold_bin, 46);
        assert!((summary.min_conf - 0.46).abs() < 1e-12);
    }
}
