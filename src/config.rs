//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::ingest::IngestConfig;
use crate::query::DEFAULT_PAGE_SIZE;
use crate::storage::{self, SyncMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("logbook").to_string_lossy().to_string())
        .unwrap_or_else(|| "./logbook_data".to_string())
}

fn default_database() -> String {
    "sailing_db".to_string()
}

fn default_sync_interval() -> u64 {
    1000 // 1 second
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database(),
            sync_mode: SyncMode::default(),
            sync_interval_ms: default_sync_interval(),
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~` expanded
    pub fn data_path(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.data_dir)),
            None => PathBuf::from(&self.data_dir),
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Page size used by listings when no limit is given
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level. Output goes to the
    /// configured file, or stderr.
    pub fn init_tracing(&self) -> Result<(), ConfigError> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("logbook={}", self.level)));

        let writer = match &self.file {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| ConfigError::Io {
                        path: PathBuf::from(path),
                        error: e.to_string(),
                    })?;
                BoxMakeWriter::new(std::sync::Mutex::new(file))
            }
            None => BoxMakeWriter::new(std::io::stderr),
        };

        let registry = tracing_subscriber::registry().with(filter);
        let result = match self.format.as_str() {
            "json" => registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .try_init(),
            _ => registry
                .with(tracing_subscriber::fmt::layer().with_writer(writer))
                .try_init(),
        };

        result.map_err(|e| ConfigError::Logging(e.to_string()))
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        for path in Self::default_paths() {
            if path.exists() {
                match Self::load_with_env(&path) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Config file locations, in lookup order
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("logbook").join("config.toml")),
            Some(PathBuf::from("/etc/logbook/config.toml")),
            Some(PathBuf::from("./logbook.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Build the store settings from this config
    pub fn to_storage_config(&self) -> storage::StorageConfig {
        let mut config = storage::StorageConfig::new(self.storage.data_path())
            .database(&self.storage.database)
            .sync_mode(self.storage.sync_mode);
        config.sync_interval_ms = self.storage.sync_interval_ms;
        config
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(data_dir) = var("LOGBOOK_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(database) = var("LOGBOOK_DATABASE") {
            self.storage.database = database;
        }
        if let Some(mode) = var("LOGBOOK_SYNC_MODE") {
            match mode.as_str() {
                "every_write" => self.storage.sync_mode = SyncMode::EveryWrite,
                "batched" => self.storage.sync_mode = SyncMode::Batched,
                "none" => self.storage.sync_mode = SyncMode::None,
                other => tracing::warn!("Ignoring unknown LOGBOOK_SYNC_MODE {:?}", other),
            }
        }

        // Ingest overrides
        if let Some(size) = var("LOGBOOK_MAX_BATCH_SIZE") {
            if let Ok(size) = size.parse() {
                self.ingest.max_batch_size = size;
            }
        }

        // Logging overrides
        if let Some(level) = var("LOGBOOK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOGBOOK_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Logbook Configuration
#
# Environment variables override these settings:
# - LOGBOOK_DATA_DIR
# - LOGBOOK_DATABASE
# - LOGBOOK_SYNC_MODE
# - LOGBOOK_MAX_BATCH_SIZE
# - LOGBOOK_LOG_LEVEL
# - LOGBOOK_LOG_FORMAT

[storage]
# Directory holding the databases
data_dir = "~/.local/share/logbook"

# Database name (a directory under data_dir)
database = "sailing_db"

# Log sync strategy: every_write, batched or none
sync_mode = "batched"

# How often the background task syncs logs to disk (ms)
sync_interval_ms = 1000

[ingest]
# Largest accepted checkpoint or track point batch
max_batch_size = 1000

# Reject track points older than the voyage's latest one
# (by default they are stored and flagged)
reject_out_of_order_tracks = false

[query]
# Page size for voyage listings
default_page_size = 100

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/logbook/logbook.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.storage.database, "sailing_db");
        assert_eq!(config.storage.sync_mode, SyncMode::Batched);
        assert_eq!(config.ingest.max_batch_size, 1000);
        assert!(!config.ingest.reject_out_of_order_tracks);
        assert_eq!(config.query.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            data_dir = "/tmp/logbook"
            sync_mode = "every_write"

            [ingest]
            reject_out_of_order_tracks = true
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, "/tmp/logbook");
        assert_eq!(config.storage.database, "sailing_db");
        assert_eq!(config.storage.sync_mode, SyncMode::EveryWrite);
        assert!(config.ingest.reject_out_of_order_tracks);
        assert_eq!(config.ingest.max_batch_size, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logbook.toml");
        std::fs::write(&path, "[storage]\ndatabase = \"regatta\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.database, "regatta");

        std::fs::write(&path, "[storage\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LOGBOOK_DATA_DIR", "/srv/logbook"),
            ("LOGBOOK_SYNC_MODE", "none"),
            ("LOGBOOK_MAX_BATCH_SIZE", "50"),
            ("LOGBOOK_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.data_dir, "/srv/logbook");
        assert_eq!(config.storage.sync_mode, SyncMode::None);
        assert_eq!(config.ingest.max_batch_size, 50);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_to_storage_config() {
        let mut config = Config::default();
        config.storage.data_dir = "/tmp/voyages".to_string();
        config.storage.database = "test_db".to_string();
        config.storage.sync_interval_ms = 250;

        let storage = config.to_storage_config();
        assert_eq!(storage.database_dir(), PathBuf::from("/tmp/voyages/test_db"));
        assert_eq!(storage.sync_interval_ms, 250);
    }
}
