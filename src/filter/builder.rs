//! Parameterized SQL assembly for the dynamic image and histogram queries.
//!
//! Structure (table names, clauses, bin expressions) is written by this
//! module; every caller-supplied value goes through [`QueryBuilder::bind`]
//! and reaches the store as a bound parameter.

use super::{ConfidenceRange, ImageQuery, Predicate};
use crate::histogram::bins::BIN_EPSILON;

/// SQL flavour of the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Build-side bin of a confidence expression, clamped to `[0, 100]`.
    pub fn bin_expr(self, value: &str) -> String {
        match self {
            // Confidences are non-negative, so truncation equals floor after the clamp.
            Dialect::Sqlite => format!(
                "MAX(0, MIN(100, CAST({value} * 100.0 + {BIN_EPSILON:.6} AS INTEGER)))"
            ),
            Dialect::Postgres => format!(
                "GREATEST(0, LEAST(100, FLOOR({value} * 100.0 + {BIN_EPSILON:.6})))::SMALLINT"
            ),
        }
    }

    fn placeholder(self, index: usize, value: &SqlValue) -> String {
        match (self, value) {
            (Dialect::Sqlite, _) => format!("?{index}"),
            // Confidence columns are REAL; compare in double precision.
            (Dialect::Postgres, SqlValue::Real(_)) => format!("${index}::DOUBLE PRECISION"),
            (Dialect::Postgres, _) => format!("${index}"),
        }
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    /// Only produced for PostgreSQL, where it binds to `text[]`.
    TextList(Vec<String>),
    Real(f64),
    Int(i64),
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(value) => value.to_sql(),
            SqlValue::Real(value) => value.to_sql(),
            SqlValue::Int(value) => value.to_sql(),
            SqlValue::TextList(_) => Err(rusqlite::Error::ToSqlConversionFailure(
                "text lists cannot be bound in sqlite".into(),
            )),
        }
    }
}

#[cfg(feature = "postgres")]
impl SqlValue {
    pub fn as_pg(&self) -> &(dyn postgres::types::ToSql + Sync) {
        match self {
            SqlValue::Text(value) => value,
            SqlValue::TextList(values) => values,
            SqlValue::Real(value) => value,
            SqlValue::Int(value) => value,
        }
    }
}

/// Accumulates SQL text and its bound values.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlValue>,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Append trusted SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder for `value`.
    pub fn bind(&mut self, value: SqlValue) -> &mut Self {
        let placeholder = self.dialect.placeholder(self.params.len() + 1, &value);
        self.sql.push_str(&placeholder);
        self.params.push(value);
        self
    }

    /// Append `predicate` against the detection table aliased as `b`.
    pub fn push_predicate(&mut self, predicate: &Predicate) -> &mut Self {
        match predicate {
            Predicate::LabelSet(labels) => self.push_label_set(labels),
            Predicate::ConfidenceRanges(ranges) => self.push_ranges(ranges),
        }
    }

    fn push_label_set(&mut self, labels: &[String]) -> &mut Self {
        match self.dialect {
            Dialect::Postgres => {
                self.push("b.label = ANY(");
                self.bind(SqlValue::TextList(labels.to_vec()));
                self.push(")")
            }
            Dialect::Sqlite => {
                if labels.is_empty() {
                    return self.push("0");
                }
                self.push("b.label IN (");
                for (i, label) in labels.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(SqlValue::Text(label.clone()));
                }
                self.push(")")
            }
        }
    }

    fn push_ranges(&mut self, ranges: &[ConfidenceRange]) -> &mut Self {
        if ranges.is_empty() {
            return self.push("1 = 1");
        }
        self.push("(");
        for (i, range) in ranges.iter().enumerate() {
            if i > 0 {
                self.push(" OR ");
            }
            self.push("(b.confidence_score >= ");
            self.bind(SqlValue::Real(range.low));
            self.push(" AND b.confidence_score < ");
            self.bind(SqlValue::Real(range.high));
            self.push(")");
        }
        self.push(")")
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn finish(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

/// Page of `(image_file_id, path)` rows for an [`ImageQuery`].
pub fn images_query(dialect: Dialect, query: &ImageQuery) -> QueryBuilder {
    let mut qb = QueryBuilder::new(dialect);
    if query.labels.is_empty() {
        qb.push("SELECT y.image_file_id, y.path FROM yfcc_index y ORDER BY y.ts DESC, y.image_file_id ASC");
    } else {
        qb.push(
            "SELECT y.image_file_id, y.path FROM yfcc_index y \
             JOIN bb_table b ON b.image_file_id = y.image_file_id WHERE ",
        );
        for (i, predicate) in query.predicates().iter().enumerate() {
            if i > 0 {
                qb.push(" AND ");
            }
            qb.push_predicate(predicate);
        }
        qb.push(" GROUP BY y.image_file_id, y.path HAVING COUNT(DISTINCT b.label) = ");
        qb.bind(SqlValue::Int(query.labels.len() as i64));
        qb.push(" ORDER BY MAX(y.ts) DESC, y.image_file_id ASC");
    }
    qb.push(" LIMIT ");
    qb.bind(SqlValue::Int(query.limit));
    qb.push(" OFFSET ");
    qb.bind(SqlValue::Int(query.offset));
    qb
}

/// Per-bin count of images in which every label of `labels` has a detection
/// in that same bin. Rows are `(bin, image_count)`.
pub fn label_set_histogram_query(dialect: Dialect, labels: &[String]) -> QueryBuilder {
    let predicate = Predicate::label_set(labels.iter().cloned());
    let wanted = match &predicate {
        Predicate::LabelSet(unique) => unique.len() as i64,
        Predicate::ConfidenceRanges(_) => 0,
    };
    let bin = dialect.bin_expr("b.confidence_score");

    let mut qb = QueryBuilder::new(dialect);
    qb.push("WITH x AS (SELECT b.image_file_id, ");
    qb.push(&bin);
    qb.push(" AS bin, COUNT(DISTINCT b.label) AS labels_hit FROM bb_table b WHERE b.confidence_score IS NOT NULL AND ");
    qb.push_predicate(&predicate);
    qb.push(" GROUP BY b.image_file_id, ");
    qb.push(&bin);
    qb.push(") SELECT bin, COUNT(*) FROM x WHERE labels_hit = ");
    qb.bind(SqlValue::Int(wanted));
    qb.push(" GROUP BY bin ORDER BY bin");
    qb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::MAX_LIMIT;

    #[test]
    fn test_latest_images_query_ignores_ranges() {
        let query = ImageQuery::new(
            vec![],
            Some(vec![ConfidenceRange::from_bins(40, 45)]),
            20,
            40,
            MAX_LIMIT,
        );
        let (sql, params) = images_query(Dialect::Sqlite, &query).finish();
        assert!(!sql.contains("bb_table"));
        assert!(sql.ends_with("LIMIT ?1 OFFSET ?2"));
        assert_eq!(params, vec![SqlValue::Int(20), SqlValue::Int(40)]);
    }

    #[test]
    fn test_label_query_binds_every_value() {
        let query = ImageQuery::new(
            vec!["cat".into(), "dog'; DROP TABLE bb_table; --".into()],
            Some(vec![ConfidenceRange::from_bins(40, 45), ConfidenceRange::from_bins(90, 100)]),
            10,
            0,
            MAX_LIMIT,
        );
        let (sql, params) = images_query(Dialect::Sqlite, &query).finish();
        assert!(!sql.contains("DROP"));
        assert!(sql.contains("b.label IN (?1, ?2)"));
        assert!(sql.contains("(b.confidence_score >= ?3 AND b.confidence_score < ?4) OR"));
        assert!(sql.contains("HAVING COUNT(DISTINCT b.label) = ?7"));
        assert_eq!(params.len(), 9);
        assert_eq!(params[6], SqlValue::Int(2));
        assert_eq!(params[7], SqlValue::Int(10));
    }

    #[test]
    fn test_postgres_placeholders() {
        let query = ImageQuery::new(
            vec!["cat".into()],
            Some(vec![ConfidenceRange::from_bins(50, 50)]),
            10,
            0,
            MAX_LIMIT,
        );
        let (sql, params) = images_query(Dialect::Postgres, &query).finish();
        assert!(sql.contains("b.label = ANY($1)"));
        assert!(sql.contains("b.confidence_score >= $2::DOUBLE PRECISION"));
        assert!(sql.contains("LIMIT $5 OFFSET $6"));
        assert_eq!(params[0], SqlValue::TextList(vec!["cat".into()]));
    }

    #[test]
    fn test_label_set_histogram_counts_unique_labels() {
        let labels = vec!["cat".to_string(), "cat".to_string(), "dog".to_string()];
        let (sql, params) = label_set_histogram_query(Dialect::Sqlite, &labels).finish();
        assert!(sql.contains("CAST(b.confidence_score * 100.0 + 0.000001 AS INTEGER)"));
        assert_eq!(params.last(), Some(&SqlValue::Int(2)));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty_predicates_render_constants() {
        let mut qb = QueryBuilder::new(Dialect::Sqlite);
        qb.push_predicate(&Predicate::LabelSet(vec![]));
        qb.push(" AND ");
        qb.push_predicate(&Predicate::ConfidenceRanges(vec![]));
        assert_eq!(qb.sql(), "0 AND 1 = 1");
        assert!(qb.params().is_empty());
    }
}
