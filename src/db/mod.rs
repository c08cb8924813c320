mod schema;
pub mod detections;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod postgres_schema;

use anyhow::Result;

pub use detections::{
    BoundingBox, Detection, DetectionFilter, DetectionView, ImageDetections, ImageRecord,
    ImageRef, NewDetection,
};

use crate::config::{DatabaseConfig, DatabaseType};
use crate::filter::ImageQuery;
use crate::histogram::{HistogramContents, LabelCounts, RebuildCounts};

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
}

/// Handle to the detection store and its aggregate tables.
///
/// The handle holds no open connection; each call acquires one (a fresh
/// SQLite connection or a pooled PostgreSQL client) and releases it before
/// returning, so a `Database` can be shared freely across threads.
pub struct Database {
    inner: DatabaseInner,
}

impl Database {
    /// Open a database connection based on the provided configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        #[cfg(feature = "postgres")]
        {
            if config.backend == DatabaseType::Postgresql {
                let url = config.postgresql_url.as_deref()
                    .ok_or_else(|| anyhow::anyhow!("PostgreSQL URL not configured"))?;
                let pool_size = config.pool_size.unwrap_or(10);
                let pg = postgres::PgDb::open(url, pool_size)?;
                return Ok(Self { inner: DatabaseInner::Postgres(pg) });
            }
        }

        #[cfg(not(feature = "postgres"))]
        if config.backend == DatabaseType::Postgresql {
            anyhow::bail!(
                "PostgreSQL backend requested but yfcc-boxes was built without the `postgres` feature"
            );
        }

        let db = sqlite::SqliteDb::open(&config.sqlite_path)?;
        Ok(Self { inner: DatabaseInner::Sqlite(db) })
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            DatabaseInner::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(_) => "postgresql",
        }
    }

    pub fn initialize(&self) -> Result<()> {
        dispatch!(self, initialize())
    }

    // ========================================================================
    // Image index and detections
    // ========================================================================

    /// Upsert an image and replace its detections, numbering them from 1.
    pub fn record_image(&self, image: &ImageRecord, detections: &[NewDetection]) -> Result<()> {
        dispatch!(self, record_image(image, detections))
    }

    pub fn image_detections(&self, image_id: &str) -> Result<Option<ImageDetections>> {
        dispatch!(self, image_detections(image_id))
    }

    pub fn filter_images(&self, query: &ImageQuery) -> Result<Vec<ImageRef>> {
        dispatch!(self, filter_images(query))
    }

    /// Sparse `(bin, image_count)` rows for images holding every label in one bin.
    pub fn label_set_histogram(&self, labels: &[String]) -> Result<Vec<(i64, i64)>> {
        dispatch!(self, label_set_histogram(labels))
    }

    // ========================================================================
    // Histograms
    // ========================================================================

    pub fn rebuild_histograms(&self, updated_at: i64) -> Result<RebuildCounts> {
        dispatch!(self, rebuild_histograms(updated_at))
    }

    pub fn label_counts_at_or_above(&self, bin: u8) -> Result<LabelCounts> {
        dispatch!(self, label_counts_at_or_above(bin))
    }

    pub fn images_at_or_above(&self, bin: u8) -> Result<u64> {
        dispatch!(self, images_at_or_above(bin))
    }

    pub fn total_image_count(&self) -> Result<u64> {
        dispatch!(self, total_image_count())
    }

    /// Label counts, qualifying images and index size, read from one snapshot.
    pub fn threshold_snapshot(&self, bin: u8) -> Result<(LabelCounts, u64, u64)> {
        dispatch!(self, threshold_snapshot(bin))
    }

    pub fn histogram_contents(&self) -> Result<HistogramContents> {
        dispatch!(self, histogram_contents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_defaults_to_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("open.db"),
            ..DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        assert_eq!(db.backend_name(), "sqlite");
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_postgres_backend_without_feature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            backend: DatabaseType::Postgresql,
            sqlite_path: dir.path().join("unused.db"),
            postgresql_url: Some("postgres://localhost/yfcc".to_string()),
            ..DatabaseConfig::default()
        };
        let err = Database::open(&config).err().unwrap();
        assert!(err.to_string().contains("postgres"));
        assert!(!config.sqlite_path.exists());
    }
}
