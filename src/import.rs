//! Bulk loading of detector output into the image index and detection store.
//!
//! Input is JSON Lines, one image per line:
//!
//! ```text
//! {"id":"abc","path":"https://…/abc.jpg","detections":[{"label":"cat","confidence":0.91,"bbox":{"center_x":0.5,"center_y":0.4,"width":0.2,"height":0.3}}]}
//! ```
//!
//! `indexed_at` is optional and defaults to the import time. Box numbers are
//! assigned 1..n in the order the detections appear.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::BufRead;
use tracing::{info, warn};

use crate::db::{Database, ImageRecord, NewDetection};
use crate::labels::is_known_label;

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detections: Vec<NewDetection>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub images: u64,
    pub detections: u64,
    /// Detections whose label is outside the vocabulary; stored, but never counted.
    pub unknown_labels: u64,
}

/// Import every record of `reader`, stopping at the first malformed line.
///
/// Lines before the failure stay committed; each image is written in its own
/// transaction.
pub fn import_jsonl<R: BufRead>(db: &Database, reader: R) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let now = Utc::now();

    for (number, line) in reader.lines().enumerate() {
        let line_no = number + 1;
        let line = line.with_context(|| format!("read line {}", line_no))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: ImportRecord = serde_json::from_str(line)
            .with_context(|| format!("parse line {}", line_no))?;

        for detection in &record.detections {
            if !is_known_label(&detection.label) {
                warn!(image = %record.id, label = %detection.label, "Unknown label");
                stats.unknown_labels += 1;
            }
        }

        let image = ImageRecord {
            id: record.id,
            path: record.path,
            indexed_at: record.indexed_at.unwrap_or(now),
        };
        db.record_image(&image, &record.detections)
            .with_context(|| format!("store image {} from line {}", image.id, line_no))?;

        stats.images += 1;
        stats.detections += record.detections.len() as u64;
    }

    info!(
        images = stats.images,
        detections = stats.detections,
        unknown_labels = stats.unknown_labels,
        "Import finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use std::io::Cursor;

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("import.db"),
            ..DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    #[test]
    fn test_import_assigns_box_numbers() {
        let (_dir, db) = open_temp();
        let input = r#"
{"id":"img1","path":"/data/img1.jpg","indexed_at":"2024-05-01T12:00:00Z","detections":[{"label":"cat","confidence":0.9,"bbox":{"center_x":0.5,"center_y":0.5,"width":0.2,"height":0.2}},{"label":"unicorn","confidence":0.5,"bbox":{"center_x":0.1,"center_y":0.1,"width":0.1,"height":0.1}}]}

{"id":"img2","path":"/data/img2.jpg"}
"#;
        let stats = import_jsonl(&db, Cursor::new(input)).unwrap();
        assert_eq!(stats, ImportStats { images: 2, detections: 2, unknown_labels: 1 });

        let img1 = db.image_detections("img1").unwrap().unwrap();
        let numbers: Vec<i32> = img1.detections.iter().map(|d| d.index).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(
            img1.indexed_at.to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
        assert!(db.image_detections("img2").unwrap().unwrap().detections.is_empty());
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let (_dir, db) = open_temp();
        let input = "{\"id\":\"ok\",\"path\":\"/a.jpg\"}\nnot json\n";
        let err = import_jsonl(&db, Cursor::new(input)).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        assert_eq!(db.total_image_count().unwrap(), 1);
    }
}
