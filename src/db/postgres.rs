//! PostgreSQL backend implementation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use postgres::{GenericClient, IsolationLevel, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;

use super::detections::{BoundingBox, Detection, ImageDetections, ImageRecord, ImageRef, NewDetection};
use super::postgres_schema::POSTGRES_SCHEMA;
use crate::filter::builder::{images_query, label_set_histogram_query};
use crate::filter::{Dialect, ImageQuery, SqlValue};
use crate::histogram::{HistogramContents, LabelCounts, RebuildCounts};

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

fn bind_refs(params: &[SqlValue]) -> Vec<&(dyn postgres::types::ToSql + Sync)> {
    params.iter().map(SqlValue::as_pg).collect()
}

impl PgDb {
    pub fn open(url: &str, pool_size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)?;
        Ok(Self { pool })
    }

    pub fn initialize(&self) -> Result<()> {
        let mut client = self.pool.get()?;
        client.batch_execute(POSTGRES_SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // Image index and detections
    // ========================================================================

    pub fn record_image(&self, image: &ImageRecord, detections: &[NewDetection]) -> Result<()> {
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;
        tx.execute(
            r#"
            INSERT INTO yfcc_index (image_file_id, path, ts, total_bboxes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (image_file_id) DO UPDATE
            SET path = EXCLUDED.path, ts = EXCLUDED.ts, total_bboxes = EXCLUDED.total_bboxes
            "#,
            &[&image.id, &image.path, &image.indexed_at, &(detections.len() as i32)],
        )?;
        tx.execute("DELETE FROM bb_table WHERE image_file_id = $1", &[&image.id])?;
        let stmt = tx.prepare(
            r#"
            INSERT INTO bb_table (
                image_file_id, bounding_box_number, label, confidence_score,
                center_x, center_y, width, height
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )?;
        for (i, detection) in detections.iter().enumerate() {
            tx.execute(
                &stmt,
                &[
                    &image.id,
                    &((i + 1) as i32),
                    &detection.label,
                    &(detection.confidence as f32),
                    &(detection.bbox.center_x as f32),
                    &(detection.bbox.center_y as f32),
                    &(detection.bbox.width as f32),
                    &(detection.bbox.height as f32),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn image_detections(&self, image_id: &str) -> Result<Option<ImageDetections>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            r#"
            SELECT y.path, y.ts, b.bounding_box_number, b.label, b.confidence_score,
                   b.center_x, b.center_y, b.width, b.height
            FROM yfcc_index y
            LEFT JOIN bb_table b ON y.image_file_id = b.image_file_id
            WHERE y.image_file_id = $1
            ORDER BY COALESCE(b.bounding_box_number, 0)
            "#,
            &[&image_id],
        )?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let path: String = first.get(0);
        let indexed_at: DateTime<Utc> = first.get(1);
        let detections = rows
            .iter()
            .filter_map(|row| {
                let index: Option<i32> = row.get(2);
                let label: Option<String> = row.get(3);
                let confidence: Option<f32> = row.get(4);
                let (index, label, confidence) = (index?, label?, confidence?);
                let coord = |i: usize| row.get::<_, Option<f32>>(i).unwrap_or(0.0) as f64;
                Some(Detection {
                    index,
                    label,
                    confidence: confidence as f64,
                    bbox: BoundingBox {
                        center_x: coord(5),
                        center_y: coord(6),
                        width: coord(7),
                        height: coord(8),
                    },
                })
            })
            .collect();
        Ok(Some(ImageDetections {
            id: image_id.to_string(),
            path,
            indexed_at,
            detections,
        }))
    }

    pub fn filter_images(&self, query: &ImageQuery) -> Result<Vec<ImageRef>> {
        let mut client = self.pool.get()?;
        let (sql, params) = images_query(Dialect::Postgres, query).finish();
        let rows = client.query(&sql, &bind_refs(&params))?;
        Ok(rows
            .iter()
            .map(|row| ImageRef { id: row.get(0), path: row.get(1) })
            .collect())
    }

    pub fn label_set_histogram(&self, labels: &[String]) -> Result<Vec<(i64, i64)>> {
        let mut client = self.pool.get()?;
        let (sql, params) = label_set_histogram_query(Dialect::Postgres, labels).finish();
        let rows = client.query(&sql, &bind_refs(&params))?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, i16>(0) as i64, row.get::<_, i64>(1)))
            .collect())
    }

    // ========================================================================
    // Histogram rebuild
    // ========================================================================

    /// Replace both histograms in one transaction.
    ///
    /// Rows are removed with DELETE rather than TRUNCATE: TRUNCATE takes an
    /// ACCESS EXCLUSIVE lock and would stall concurrent readers until commit.
    pub fn rebuild_histograms(&self, updated_at: i64) -> Result<RebuildCounts> {
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;

        tx.execute("DELETE FROM yfcc_label_conf_hist", &[])?;
        tx.execute("DELETE FROM yfcc_images_maxbin_hist", &[])?;

        let label_bins = tx.execute(
            &format!(
                r#"
                INSERT INTO yfcc_label_conf_hist (label, conf_bin, box_count, updated_at)
                SELECT b.label, {bin} AS conf_bin, COUNT(*), $1::BIGINT
                FROM bb_table b
                WHERE b.confidence_score IS NOT NULL
                GROUP BY b.label, conf_bin
                "#,
                bin = Dialect::Postgres.bin_expr("b.confidence_score"),
            ),
            &[&updated_at],
        )?;

        let max_bins = tx.execute(
            &format!(
                r#"
                WITH maxbin AS (
                    SELECT b.image_file_id, {bin} AS max_bin
                    FROM bb_table b
                    WHERE b.confidence_score IS NOT NULL
                    GROUP BY b.image_file_id
                )
                INSERT INTO yfcc_images_maxbin_hist (max_bin, image_count, updated_at)
                SELECT max_bin, COUNT(*)::BIGINT, $1::BIGINT
                FROM maxbin
                GROUP BY max_bin
                "#,
                bin = Dialect::Postgres.bin_expr("MAX(b.confidence_score)"),
            ),
            &[&updated_at],
        )?;

        tx.commit()?;
        Ok(RebuildCounts { label_bins, max_bins })
    }

    // ========================================================================
    // Threshold queries
    // ========================================================================

    pub fn label_counts_at_or_above(&self, bin: u8) -> Result<LabelCounts> {
        let mut client = self.pool.get()?;
        read_label_counts(&mut *client, bin)
    }

    pub fn images_at_or_above(&self, bin: u8) -> Result<u64> {
        let mut client = self.pool.get()?;
        read_images_at_or_above(&mut *client, bin)
    }

    pub fn total_image_count(&self) -> Result<u64> {
        let mut client = self.pool.get()?;
        read_total_images(&mut *client)
    }

    /// All three threshold reads from one repeatable-read snapshot.
    pub fn threshold_snapshot(&self, bin: u8) -> Result<(LabelCounts, u64, u64)> {
        let mut client = self.pool.get()?;
        let mut tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()?;
        let label_counts = read_label_counts(&mut tx, bin)?;
        let images = read_images_at_or_above(&mut tx, bin)?;
        let total = read_total_images(&mut tx)?;
        tx.commit()?;
        Ok((label_counts, images, total))
    }

    pub fn histogram_contents(&self) -> Result<HistogramContents> {
        let mut client = self.pool.get()?;
        let mut tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()?;
        let label_bins = tx
            .query(
                "SELECT label, conf_bin, box_count FROM yfcc_label_conf_hist ORDER BY label, conf_bin",
                &[],
            )?
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, i16>(1) as u8, row.get::<_, i64>(2) as u64))
            .collect();
        let max_bins = tx
            .query(
                "SELECT max_bin, image_count FROM yfcc_images_maxbin_hist ORDER BY max_bin",
                &[],
            )?
            .iter()
            .map(|row| (row.get::<_, i16>(0) as u8, row.get::<_, i64>(1) as u64))
            .collect();
        let updated_at: i64 = tx
            .query_one(
                r#"
                SELECT GREATEST(
                    COALESCE((SELECT MAX(updated_at) FROM yfcc_label_conf_hist), 0),
                    COALESCE((SELECT MAX(updated_at) FROM yfcc_images_maxbin_hist), 0)
                )::BIGINT
                "#,
                &[],
            )?
            .get(0);
        tx.commit()?;
        Ok(HistogramContents { label_bins, max_bins, updated_at })
    }
}

fn read_label_counts<C: GenericClient>(client: &mut C, bin: u8) -> Result<LabelCounts> {
    let rows = client.query(
        r#"
        SELECT label, COALESCE(SUM(box_count), 0)::BIGINT
        FROM yfcc_label_conf_hist
        WHERE conf_bin >= $1
        GROUP BY label
        "#,
        &[&(bin as i16)],
    )?;
    let rows = rows
        .iter()
        .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
        .collect();
    let updated_at: i64 = client
        .query_one(
            "SELECT COALESCE(MAX(updated_at), 0)::BIGINT FROM yfcc_label_conf_hist",
            &[],
        )?
        .get(0);
    Ok(LabelCounts::from_rows(rows, updated_at))
}

fn read_images_at_or_above<C: GenericClient>(client: &mut C, bin: u8) -> Result<u64> {
    let count: i64 = client
        .query_one(
            "SELECT COALESCE(SUM(image_count), 0)::BIGINT FROM yfcc_images_maxbin_hist WHERE max_bin >= $1",
            &[&(bin as i16)],
        )?
        .get(0);
    Ok(count.max(0) as u64)
}

fn read_total_images<C: GenericClient>(client: &mut C) -> Result<u64> {
    let count: i64 = client
        .query_one("SELECT COUNT(*) FROM yfcc_index", &[])?
        .get(0);
    Ok(count.max(0) as u64)
}
