//! Confidence binning.
//!
//! Two rules exist and are intentionally kept apart:
//!
//! * [`build_bin`] is applied to stored detections when the histograms are
//!   rebuilt: `clamp(floor(c * 100 + 1e-6), 0, 100)`.
//! * [`query_bin`] is applied to a user threshold: the threshold is rounded to
//!   two decimals, clamped to `[0, 1]`, multiplied by 100 and rounded.
//!
//! The rules can disagree at half-bin boundaries. A detection at `0.455` is
//! stored in bin 45 while a threshold of `0.455` selects bins `>= 46`.

/// Highest bin index; bins run from 0 to `MAX_BIN` inclusive.
pub const MAX_BIN: u8 = 100;

/// Number of bins in a full histogram.
pub const BIN_COUNT: usize = MAX_BIN as usize + 1;

/// Nudge applied before flooring so `0.29 * 100 = 28.999..` lands in bin 29.
pub const BIN_EPSILON: f64 = 0.000001;

/// Bin of a stored detection confidence.
pub fn build_bin(confidence: f64) -> u8 {
    if confidence.is_nan() {
        return 0;
    }
    (confidence * 100.0 + BIN_EPSILON).floor().clamp(0.0, MAX_BIN as f64) as u8
}

/// Threshold as the dashboard reports it: two decimals, within `[0, 1]`.
pub fn normalize_min_conf(min_conf: f64) -> f64 {
    if min_conf.is_nan() {
        return 0.0;
    }
    ((min_conf * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

/// First bin counted by a "confidence at or above `min_conf`" query.
pub fn query_bin(min_conf: f64) -> u8 {
    (normalize_min_conf(min_conf) * 100.0).round() as u8
}
