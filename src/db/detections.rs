//! Types for the image index and per-detection rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::histogram::normalize_min_conf;
use crate::labels::label_color_hex;

/// Normalized box geometry, all values relative to image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Pixel corners `(x0, y0, x1, y1)` for an image of the given size.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> (f64, f64, f64, f64) {
        let (w, h) = (image_width as f64, image_height as f64);
        (
            (self.center_x - self.width / 2.0) * w,
            (self.center_y - self.height / 2.0) * h,
            (self.center_x + self.width / 2.0) * w,
            (self.center_y + self.height / 2.0) * h,
        )
    }
}

/// A stored detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// 1-based box number within the image.
    pub index: i32,
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// A detection about to be written; its box number is assigned on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// An entry of the image index.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub path: String,
    pub indexed_at: DateTime<Utc>,
}

/// Identifier and location of an indexed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub id: String,
    pub path: String,
}

/// An indexed image with its detections ordered by box number.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetections {
    pub id: String,
    pub path: String,
    pub indexed_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

impl ImageDetections {
    /// Detections passing `filter`, in box order.
    pub fn filtered<'a>(&'a self, filter: &'a DetectionFilter) -> impl Iterator<Item = &'a Detection> + 'a {
        self.detections.iter().filter(move |d| filter.matches(d))
    }
}

/// Which boxes of an image to show.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFilter {
    pub min_conf: f64,
    /// `None` shows every label; an empty set shows nothing.
    pub labels: Option<HashSet<String>>,
}

impl DetectionFilter {
    pub fn new(min_conf: f64, labels: Option<HashSet<String>>) -> Self {
        Self {
            min_conf: normalize_min_conf(min_conf),
            labels,
        }
    }

    pub fn matches(&self, detection: &Detection) -> bool {
        if detection.confidence < self.min_conf {
            return false;
        }
        match &self.labels {
            Some(labels) => labels.contains(&detection.label),
            None => true,
        }
    }
}

/// Detection as the API reports it.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionView<'a> {
    pub index: i32,
    pub label: &'a str,
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub color: String,
}

impl<'a> From<&'a Detection> for DetectionView<'a> {
    fn from(detection: &'a Detection) -> Self {
        Self {
            index: detection.index,
            label: &detection.label,
            confidence: detection.confidence,
            bbox: detection.bbox,
            color: label_color_hex(&detection.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(label: &str, confidence: f64) -> Detection {
        Detection {
            index: 1,
            label: label.to_string(),
            confidence,
            bbox: BoundingBox { center_x: 0.5, center_y: 0.5, width: 0.2, height: 0.4 },
        }
    }

    #[test]
    fn test_filter_threshold_and_labels() {
        let all = DetectionFilter::new(0.4, None);
        assert!(all.matches(&detection("cat", 0.4)));
        assert!(!all.matches(&detection("cat", 0.39)));

        let dogs = DetectionFilter::new(0.0, Some(HashSet::from(["dog".to_string()])));
        assert!(dogs.matches(&detection("dog", 0.1)));
        assert!(!dogs.matches(&detection("cat", 0.9)));

        let none = DetectionFilter::new(0.0, Some(HashSet::new()));
        assert!(!none.matches(&detection("cat", 0.9)));
    }

    #[test]
    fn test_bbox_to_pixels() {
        let bbox = BoundingBox { center_x: 0.5, center_y: 0.5, width: 0.2, height: 0.4 };
        let (x0, y0, x1, y1) = bbox.to_pixels(100, 50);
        assert!((x0 - 40.0).abs() < 1e-9);
        assert!((y0 - 15.0).abs() < 1e-9);
        assert!((x1 - 60.0).abs() < 1e-9);
        assert!((y1 - 35.0).abs() < 1e-9);
    }
}
