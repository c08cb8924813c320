//! Read and rebuild operations shared by the HTTP API and the admin CLI.
//!
//! Store failures on the threshold read path are logged and answered with
//! zeroed values so the dashboard keeps rendering. Rebuild failures are
//! never swallowed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::db::{Database, DetectionFilter, ImageDetections, ImageRef};
use crate::error::{Error, Result};
use crate::filter::{ConfidenceRange, ImageQuery};
use crate::histogram::{
    dense_bins, normalize_min_conf, query_bin, BinCount, LabelCounts, RebuildReport,
    ThresholdSummary,
};
use crate::overlay;

#[derive(Clone)]
pub struct HistogramService {
    db: Arc<Database>,
    max_limit: i64,
}

impl HistogramService {
    pub fn new(db: Arc<Database>, max_limit: i64) -> Self {
        Self { db, max_limit }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Histogram builder
    // ========================================================================

    /// Replace both aggregate tables from the current detections.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let started = Instant::now();
        let updated_at = Utc::now().timestamp();
        info!(backend = self.db.backend_name(), "Histogram rebuild started");

        match self.db.rebuild_histograms(updated_at) {
            Ok(counts) => {
                let report = RebuildReport {
                    updated_at,
                    counts,
                    elapsed: started.elapsed(),
                };
                info!(
                    label_bins = counts.label_bins,
                    max_bins = counts.max_bins,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Histogram rebuild finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!("Histogram rebuild failed: {:#}", e);
                Err(Error::RebuildFailed(e))
            }
        }
    }

    // ========================================================================
    // Threshold queries
    // ========================================================================

    pub fn label_counts_at_or_above(&self, min_conf: f64) -> LabelCounts {
        self.db
            .label_counts_at_or_above(query_bin(min_conf))
            .unwrap_or_else(|e| {
                error!("Reading label histogram failed: {:#}", e);
                LabelCounts::empty()
            })
    }

    pub fn images_with_detection_at_or_above(&self, min_conf: f64) -> u64 {
        self.db
            .images_at_or_above(query_bin(min_conf))
            .unwrap_or_else(|e| {
                error!("Reading image histogram failed: {:#}", e);
                0
            })
    }

    pub fn total_image_count(&self) -> u64 {
        self.db.total_image_count().unwrap_or_else(|e| {
            error!("Counting indexed images failed: {:#}", e);
            0
        })
    }

    /// Label counts and image totals for one threshold, all from the same snapshot.
    pub fn threshold_summary(&self, min_conf: f64) -> ThresholdSummary {
        let bin = query_bin(min_conf);
        match self.db.threshold_snapshot(bin) {
            Ok((label_counts, images_at_or_above, total_images)) => ThresholdSummary {
                min_conf: normalize_min_conf(min_conf),
                threshold_bin: bin,
                label_counts,
                images_at_or_above,
                total_images,
            },
            Err(e) => {
                error!("Reading threshold summary failed: {:#}", e);
                ThresholdSummary::empty(min_conf)
            }
        }
    }

    // ========================================================================
    // Range-filter queries
    // ========================================================================

    /// Clamp paging to this service's limit cap.
    pub fn image_query(
        &self,
        labels: Vec<String>,
        ranges: Option<Vec<ConfidenceRange>>,
        limit: i64,
        offset: i64,
    ) -> ImageQuery {
        ImageQuery::new(labels, ranges, limit, offset, self.max_limit)
    }

    pub fn filter_images(&self, query: &ImageQuery) -> Vec<ImageRef> {
        self.db.filter_images(query).unwrap_or_else(|e| {
            error!(labels = ?query.labels, "Image query failed: {:#}", e);
            Vec::new()
        })
    }

    /// Images per build-side bin in which every label of `labels` has a detection.
    pub fn label_set_histogram(&self, labels: &[String]) -> Result<Vec<BinCount>> {
        if labels.is_empty() {
            return Err(Error::MissingLabels);
        }
        let rows = self
            .db
            .label_set_histogram(labels)
            .map_err(Error::Store)?;
        Ok(dense_bins(rows))
    }

    // ========================================================================
    // Single image
    // ========================================================================

    pub fn image_detections(&self, image_id: &str) -> Result<ImageDetections> {
        match self.db.image_detections(image_id) {
            Ok(Some(image)) => Ok(image),
            Ok(None) => {
                warn!("Image {:?} not found in index", image_id);
                Err(Error::ImageNotFound(image_id.to_string()))
            }
            Err(e) => {
                error!("Fetching detections for {:?} failed: {:#}", image_id, e);
                Err(Error::ImageNotFound(image_id.to_string()))
            }
        }
    }

    /// PNG of the image with the boxes selected by `filter` outlined.
    pub fn render_overlay(&self, image_id: &str, filter: &DetectionFilter) -> Result<Vec<u8>> {
        let image = self.image_detections(image_id)?;
        let bytes = overlay::fetch_image_bytes(&image.path).map_err(|e| {
            error!("Fetching {} for {:?} failed: {:#}", image.path, image_id, e);
            Error::ImageFetch(format!("{:#}", e))
        })?;
        overlay::render_png(&bytes, image.filtered(filter)).map_err(|e| {
            error!("Rendering overlay for {:?} failed: {:#}", image_id, e);
            Error::ImageFetch(format!("{:#}", e))
        })
    }
}
