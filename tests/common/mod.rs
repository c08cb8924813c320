#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::path::Path;

use yfcc_boxes::config::DatabaseConfig;
use yfcc_boxes::db::{BoundingBox, Database, ImageRecord, NewDetection};

pub fn open_db(dir: &Path) -> Database {
    let config = DatabaseConfig {
        sqlite_path: dir.join("boxes.db"),
        ..DatabaseConfig::default()
    };
    let db = Database::open(&config).unwrap();
    db.initialize().unwrap();
    db
}

pub fn record_at(db: &Database, id: &str, path: &str, secs: i64, boxes: &[(&str, f64)]) {
    let image = ImageRecord {
        id: id.to_string(),
        path: path.to_string(),
        indexed_at: Utc.timestamp_opt(secs, 0).unwrap(),
    };
    let detections: Vec<NewDetection> = boxes
        .iter()
        .map(|(label, confidence)| NewDetection {
            label: label.to_string(),
            confidence: *confidence,
            bbox: BoundingBox { center_x: 0.5, center_y: 0.5, width: 0.5, height: 0.5 },
        })
        .collect();
    db.record_image(&image, &detections).unwrap();
}

pub fn record(db: &Database, id: &str, secs: i64, boxes: &[(&str, f64)]) {
    record_at(db, id, &format!("https://example.org/{id}.jpg"), secs, boxes);
}

/// Remove the detection table behind the store's back, so the next rebuild fails.
pub fn drop_detection_table(dir: &Path) {
    let conn = rusqlite::Connection::open(dir.join("boxes.db")).unwrap();
    conn.execute_batch("DROP TABLE bb_table").unwrap();
}

/// `img1: [(cat, 0.9)]`, `img2: [(cat, 0.3), (dog, 0.95)]`
pub fn seed_cat_dog(db: &Database) {
    record(db, "img1", 1_700_000_000, &[("cat", 0.9)]);
    record(db, "img2", 1_700_000_100, &[("cat", 0.3), ("dog", 0.95)]);
}
