pub const SCHEMA: &str = r#"
-- Image index: one row per corpus image, ordered by indexing time
CREATE TABLE IF NOT EXISTS yfcc_index (
    image_file_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    ts INTEGER NOT NULL,          -- unix milliseconds
    total_bboxes INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_yfcc_index_ts ON yfcc_index(ts);

-- Detections written by the inference pipeline
CREATE TABLE IF NOT EXISTS bb_table (
    image_file_id TEXT NOT NULL REFERENCES yfcc_index(image_file_id) ON DELETE CASCADE,
    bounding_box_number INTEGER NOT NULL,
    label TEXT NOT NULL,
    confidence_score REAL,
    center_x REAL NOT NULL,
    center_y REAL NOT NULL,
    width REAL NOT NULL,
    height REAL NOT NULL,
    PRIMARY KEY (image_file_id, bounding_box_number)
);

CREATE INDEX IF NOT EXISTS idx_bb_table_label_conf ON bb_table(label, confidence_score);

-- Box counts per (label, confidence bin)
CREATE TABLE IF NOT EXISTS yfcc_label_conf_hist (
    label TEXT NOT NULL,
    conf_bin INTEGER NOT NULL,
    box_count INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (label, conf_bin)
);

-- Image counts per bin of each image's highest confidence
CREATE TABLE IF NOT EXISTS yfcc_images_maxbin_hist (
    max_bin INTEGER PRIMARY KEY,
    image_count INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
