pub const POSTGRES_SCHEMA: &str = r#"
-- PostgreSQL schema for yfcc-boxes

CREATE TABLE IF NOT EXISTS yfcc_index (
    image_file_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    ts TIMESTAMPTZ NOT NULL DEFAULT now(),
    total_bboxes INT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_yfcc_index_ts ON yfcc_index(ts);

CREATE TABLE IF NOT EXISTS bb_table (
    image_file_id TEXT NOT NULL REFERENCES yfcc_index(image_file_id) ON DELETE CASCADE,
    bounding_box_number INT NOT NULL,
    label TEXT NOT NULL,
    confidence_score REAL,
    center_x REAL NOT NULL,
    center_y REAL NOT NULL,
    width REAL NOT NULL,
    height REAL NOT NULL,
    PRIMARY KEY (image_file_id, bounding_box_number)
);

CREATE INDEX IF NOT EXISTS idx_bb_table_label_conf ON bb_table(label, confidence_score);

CREATE TABLE IF NOT EXISTS yfcc_label_conf_hist (
    label TEXT NOT NULL,
    conf_bin SMALLINT NOT NULL,
    box_count BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (label, conf_bin)
);

CREATE TABLE IF NOT EXISTS yfcc_images_maxbin_hist (
    max_bin SMALLINT PRIMARY KEY,
    image_count BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
"#;
