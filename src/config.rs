use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::filter::MAX_LIMIT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseType,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// e.g. `host=localhost user=yfcc dbname=yfcc`
    #[serde(default)]
    pub postgresql_url: Option<String>,

    #[serde(default)]
    pub pool_size: Option<u32>,
}

fn default_sqlite_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("yfcc-boxes")
        .join("yfcc.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseType::default(),
            sqlite_path: default_sqlite_path(),
            postgresql_url: None,
            pool_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Origins allowed to call the API from a browser. Empty disables CORS headers.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Upper bound on `limit` for image pages; never above 500.
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,

    #[serde(default = "default_min_conf")]
    pub default_min_conf: f64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_max_limit() -> i64 {
    MAX_LIMIT
}

fn default_min_conf() -> f64 {
    0.4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
            max_limit: default_max_limit(),
            default_min_conf: default_min_conf(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily log files when journald is unavailable.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load from `YFCC_CONFIG` or the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::read(&config_path)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env();
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("YFCC_DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database.backend = DatabaseType::Postgresql;
                self.database.postgresql_url = Some(url);
            }
        }
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("YFCC_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("yfcc-boxes")
    }

    /// Page cap handed to the range-filter engine.
    pub fn max_limit(&self) -> i64 {
        self.server.max_limit.clamp(1, MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.backend, DatabaseType::Sqlite);
        assert!(config.database.sqlite_path.ends_with("yfcc-boxes/yfcc.db"));
        assert_eq!(config.server.max_limit, 500);
        assert!((config.server.default_min_conf - 0.4).abs() < f64::EPSILON);
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            backend = "postgresql"
            postgresql_url = "host=db user=yfcc"
            pool_size = 4

            [server]
            bind = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.backend, DatabaseType::Postgresql);
        assert_eq!(config.database.pool_size, Some(4));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.cors_origins.len(), 2);
        assert_eq!(config.server.max_limit, 500);
    }

    #[test]
    fn test_max_limit_is_capped() {
        let mut config = Config::default();
        config.server.max_limit = 10_000;
        assert_eq!(config.max_limit(), 500);
        config.server.max_limit = 0;
        assert_eq!(config.max_limit(), 1);
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.server.bind = "127.0.0.1:9999".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.bind, "127.0.0.1:9999");
    }
}
