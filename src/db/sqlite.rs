//! SQLite backend implementation.
//!
//! Every operation opens its own connection to the database file; the
//! connection is dropped (and any open transaction rolled back) on every exit
//! path. The database runs in WAL mode so readers keep seeing the last
//! committed histograms while a rebuild holds the write lock.

use anyhow::{Context, Result};
use chrono::DateTime;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::detections::{BoundingBox, Detection, ImageDetections, ImageRecord, ImageRef, NewDetection};
use super::schema::SCHEMA;
use crate::filter::builder::{images_query, label_set_histogram_query};
use crate::filter::{Dialect, ImageQuery};
use crate::histogram::{HistogramContents, LabelCounts, RebuildCounts};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteDb {
    path: PathBuf,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Self { path: path.to_path_buf() };
        db.connect()?;
        Ok(db)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("opening sqlite database {:?}", self.path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("SQLite journal mode is {}, readers may block during rebuild", mode);
        }
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // Image index and detections
    // ========================================================================

    pub fn record_image(&self, image: &ImageRecord, detections: &[NewDetection]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO yfcc_index (image_file_id, path, ts, total_bboxes)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (image_file_id) DO UPDATE
            SET path = excluded.path, ts = excluded.ts, total_bboxes = excluded.total_bboxes
            "#,
            rusqlite::params![
                image.id,
                image.path,
                image.indexed_at.timestamp_millis(),
                detections.len() as i64
            ],
        )?;
        tx.execute("DELETE FROM bb_table WHERE image_file_id = ?1", [&image.id])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO bb_table (
                    image_file_id, bounding_box_number, label, confidence_score,
                    center_x, center_y, width, height
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for (i, detection) in detections.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    image.id,
                    (i + 1) as i64,
                    detection.label,
                    detection.confidence,
                    detection.bbox.center_x,
                    detection.bbox.center_y,
                    detection.bbox.width,
                    detection.bbox.height,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn image_detections(&self, image_id: &str) -> Result<Option<ImageDetections>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT y.path, y.ts, b.bounding_box_number, b.label, b.confidence_score,
                   b.center_x, b.center_y, b.width, b.height
            FROM yfcc_index y
            LEFT JOIN bb_table b ON y.image_file_id = b.image_file_id
            WHERE y.image_file_id = ?1
            ORDER BY COALESCE(b.bounding_box_number, 0)
            "#,
        )?;
        let mut rows = stmt.query([image_id])?;
        let mut image = None;
        let mut detections = Vec::new();
        while let Some(row) = rows.next()? {
            if image.is_none() {
                let path: String = row.get(0)?;
                let millis: i64 = row.get(1)?;
                image = Some((path, DateTime::from_timestamp_millis(millis).unwrap_or_default()));
            }
            let index: Option<i32> = row.get(2)?;
            let label: Option<String> = row.get(3)?;
            let confidence: Option<f64> = row.get(4)?;
            if let (Some(index), Some(label), Some(confidence)) = (index, label, confidence) {
                detections.push(Detection {
                    index,
                    label,
                    confidence,
                    bbox: BoundingBox {
                        center_x: row.get(5)?,
                        center_y: row.get(6)?,
                        width: row.get(7)?,
                        height: row.get(8)?,
                    },
                });
            }
        }
        Ok(image.map(|(path, indexed_at)| ImageDetections {
            id: image_id.to_string(),
            path,
            indexed_at,
            detections,
        }))
    }

    pub fn filter_images(&self, query: &ImageQuery) -> Result<Vec<ImageRef>> {
        let conn = self.connect()?;
        let (sql, params) = images_query(Dialect::Sqlite, query).finish();
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(ImageRef { id: row.get(0)?, path: row.get(1)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    pub fn label_set_histogram(&self, labels: &[String]) -> Result<Vec<(i64, i64)>> {
        let conn = self.connect()?;
        let (sql, params) = label_set_histogram_query(Dialect::Sqlite, labels).finish();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // Histogram rebuild
    // ========================================================================

    pub fn rebuild_histograms(&self, updated_at: i64) -> Result<RebuildCounts> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM yfcc_label_conf_hist", [])?;
        tx.execute("DELETE FROM yfcc_images_maxbin_hist", [])?;

        let label_bins = tx.execute(
            &format!(
                r#"
                INSERT INTO yfcc_label_conf_hist (label, conf_bin, box_count, updated_at)
                SELECT b.label, {bin} AS conf_bin, COUNT(*), ?1
                FROM bb_table b
                WHERE b.confidence_score IS NOT NULL
                GROUP BY b.label, conf_bin
                "#,
                bin = Dialect::Sqlite.bin_expr("b.confidence_score"),
            ),
            [updated_at],
        )?;

        let max_bins = tx.execute(
            &format!(
                r#"
                INSERT INTO yfcc_images_maxbin_hist (max_bin, image_count, updated_at)
                SELECT m.max_bin, COUNT(*), ?1
                FROM (
                    SELECT b.image_file_id, {bin} AS max_bin
                    FROM bb_table b
                    WHERE b.confidence_score IS NOT NULL
                    GROUP BY b.image_file_id
                ) m
                GROUP BY m.max_bin
                "#,
                bin = Dialect::Sqlite.bin_expr("MAX(b.confidence_score)"),
            ),
            [updated_at],
        )?;

        tx.commit()?;
        Ok(RebuildCounts {
            label_bins: label_bins as u64,
            max_bins: max_bins as u64,
        })
    }

    // ========================================================================
    // Threshold queries
    // ========================================================================

    pub fn label_counts_at_or_above(&self, bin: u8) -> Result<LabelCounts> {
        read_label_counts(&self.connect()?, bin)
    }

    pub fn images_at_or_above(&self, bin: u8) -> Result<u64> {
        read_images_at_or_above(&self.connect()?, bin)
    }

    pub fn total_image_count(&self) -> Result<u64> {
        read_total_images(&self.connect()?)
    }

    /// All three threshold reads from one snapshot.
    pub fn threshold_snapshot(&self, bin: u8) -> Result<(LabelCounts, u64, u64)> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let label_counts = read_label_counts(&tx, bin)?;
        let images = read_images_at_or_above(&tx, bin)?;
        let total = read_total_images(&tx)?;
        tx.commit()?;
        Ok((label_counts, images, total))
    }

    pub fn histogram_contents(&self) -> Result<HistogramContents> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let label_bins = {
            let mut stmt = tx.prepare(
                "SELECT label, conf_bin, box_count FROM yfcc_label_conf_hist ORDER BY label, conf_bin",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(label, bin, count)| (label, bin as u8, count as u64))
                .collect()
        };
        let max_bins = {
            let mut stmt = tx.prepare(
                "SELECT max_bin, image_count FROM yfcc_images_maxbin_hist ORDER BY max_bin",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(bin, count)| (bin as u8, count as u64))
                .collect()
        };
        let updated_at = read_updated_at(&tx)?;
        tx.commit()?;
        Ok(HistogramContents { label_bins, max_bins, updated_at })
    }
}

fn read_updated_at(conn: &Connection) -> Result<i64> {
    let updated_at = conn.query_row(
        r#"
        SELECT MAX(
            COALESCE((SELECT MAX(updated_at) FROM yfcc_label_conf_hist), 0),
            COALESCE((SELECT MAX(updated_at) FROM yfcc_images_maxbin_hist), 0)
        )
        "#,
        [],
        |row| row.get(0),
    )?;
    Ok(updated_at)
}

fn read_label_counts(conn: &Connection, bin: u8) -> Result<LabelCounts> {
    let mut stmt = conn.prepare(
        r#"
        SELECT label, COALESCE(SUM(box_count), 0)
        FROM yfcc_label_conf_hist
        WHERE conf_bin >= ?1
        GROUP BY label
        "#,
    )?;
    let rows = stmt
        .query_map([bin as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;
    let updated_at: i64 = conn.query_row(
        "SELECT COALESCE(MAX(updated_at), 0) FROM yfcc_label_conf_hist",
        [],
        |row| row.get(0),
    )?;
    Ok(LabelCounts::from_rows(rows, updated_at))
}

fn read_images_at_or_above(conn: &Connection, bin: u8) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COALESCE(SUM(image_count), 0) FROM yfcc_images_maxbin_hist WHERE max_bin >= ?1",
        [bin as i64],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

fn read_total_images(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM yfcc_index", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn open_temp() -> (tempfile::TempDir, SqliteDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDb::open(&dir.path().join("boxes.db")).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    fn record(db: &SqliteDb, id: &str, secs: i64, boxes: &[(&str, f64)]) {
        let image = ImageRecord {
            id: id.to_string(),
            path: format!("https://example.org/{id}.jpg"),
            indexed_at: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        let detections: Vec<NewDetection> = boxes
            .iter()
            .map(|(label, confidence)| NewDetection {
                label: label.to_string(),
                confidence: *confidence,
                bbox: BoundingBox { center_x: 0.5, center_y: 0.5, width: 0.1, height: 0.1 },
            })
            .collect();
        db.record_image(&image, &detections).unwrap();
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_histograms() {
        let (_dir, db) = open_temp();
        record(&db, "img1", 1, &[("cat", 0.9)]);
        record(&db, "img2", 2, &[("cat", 0.3), ("dog", 0.95)]);
        db.rebuild_histograms(100).unwrap();
        let before = db.histogram_contents().unwrap();

        db.connect().unwrap().execute_batch("DROP TABLE bb_table").unwrap();
        assert!(db.rebuild_histograms(200).is_err());

        let after = db.histogram_contents().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.updated_at, 100);
        assert_eq!(after.total_boxes(), 3);
    }

    #[test]
    fn test_record_image_replaces_detections() {
        let (_dir, db) = open_temp();
        record(&db, "img1", 1, &[("cat", 0.9), ("dog", 0.8)]);
        record(&db, "img1", 5, &[("bird", 0.7)]);

        let image = db.image_detections("img1").unwrap().unwrap();
        assert_eq!(image.detections.len(), 1);
        assert_eq!(image.detections[0].label, "bird");
        assert_eq!(image.detections[0].index, 1);
        assert_eq!(image.indexed_at.timestamp(), 5);
        assert_eq!(db.total_image_count().unwrap(), 1);
    }

    #[test]
    fn test_image_without_detections_is_found() {
        let (_dir, db) = open_temp();
        record(&db, "empty", 1, &[]);
        let image = db.image_detections("empty").unwrap().unwrap();
        assert!(image.detections.is_empty());
        assert!(db.image_detections("missing").unwrap().is_none());
    }

    #[test]
    fn test_never_built_reads_as_empty() {
        let (_dir, db) = open_temp();
        let counts = db.label_counts_at_or_above(0).unwrap();
        assert_eq!(counts.updated_at, 0);
        assert_eq!(counts.total_boxes, 0);
        assert_eq!(db.images_at_or_above(0).unwrap(), 0);
        assert_eq!(db.histogram_contents().unwrap(), HistogramContents::default());
    }
}
