//! Ledger configuration
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `AUDIT_LEDGER__*` environment variables (e.g.
//! `AUDIT_LEDGER__STORAGE__BACKEND=sqlite`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::LedgerError;

pub const DEFAULT_CONFIG_FILE: &str = "audit-ledger.toml";
pub const ENV_PREFIX: &str = "AUDIT_LEDGER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON Lines file for the `file` backend
    pub path: Option<PathBuf>,
    /// Connection string for the `sqlite` backend, e.g. `sqlite://audit.db`
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_payload_bytes: usize,
}

impl AppendConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 25,
            max_payload_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub verify_batch_size: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
            verify_batch_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub storage: StorageConfig,
    pub append: AppendConfig,
    pub query: QueryConfig,
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::File,
                path: Some(PathBuf::from("data/audit-ledger.jsonl")),
                database_url: None,
            },
            append: AppendConfig::default(),
            query: QueryConfig::default(),
            log_filter: "audit_ledger=info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load from `audit-ledger.toml` (if present) and the environment
    pub fn load() -> Result<Self, LedgerError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from an explicit file path (optional) and the environment
    pub fn load_from(path: &Path) -> Result<Self, LedgerError> {
        let defaults = Config::try_from(&LedgerConfig::default())?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: LedgerConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            "Configuration loaded (backend: {:?}, source: {:?})",
            config.storage.backend, path
        );
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self.storage.backend {
            StorageBackend::File if self.storage.path.is_none() => {
                return Err(LedgerError::Config(
                    "storage.path is required for the file backend".to_string(),
                ));
            }
            StorageBackend::Sqlite if self.storage.database_url.is_none() => {
                return Err(LedgerError::Config(
                    "storage.database_url is required for the sqlite backend".to_string(),
                ));
            }
            _ => {}
        }

        if self.query.default_page_size == 0 || self.query.max_page_size == 0 {
            return Err(LedgerError::Config(
                "query page sizes must be greater than zero".to_string(),
            ));
        }

        if self.query.default_page_size > self.query.max_page_size {
            return Err(LedgerError::Config(format!(
                "query.default_page_size ({}) > query.max_page_size ({})",
                self.query.default_page_size, self.query.max_page_size
            )));
        }

        if self.query.verify_batch_size == 0 {
            return Err(LedgerError::Config(
                "query.verify_batch_size must be greater than zero".to_string(),
            ));
        }

        if self.append.max_payload_bytes == 0 {
            return Err(LedgerError::Config(
                "append.max_payload_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.append.max_retries, 3);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[storage]
backend = "sqlite"
database_url = "sqlite://audit.db"

[query]
default_page_size = 10
"#
        )
        .unwrap();

        let config = LedgerConfig::load_from(&path).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.database_url.as_deref(), Some("sqlite://audit.db"));
        assert_eq!(config.query.default_page_size, 10);
        assert_eq!(config.query.max_page_size, 500);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.query.default_page_size, 50);
    }

    #[test]
    fn test_validation_rejects_bad_page_sizes() {
        let mut config = LedgerConfig::default();
        config.query.default_page_size = 1000;
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));

        let mut config = LedgerConfig::default();
        config.query.verify_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_backend_location() {
        let mut config = LedgerConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        assert!(config.validate().is_err());

        config.storage.backend = StorageBackend::Memory;
        assert!(config.validate().is_ok());
    }
}
