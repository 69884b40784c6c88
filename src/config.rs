//! Runtime configuration resolved from `ROLLBOOK_*` environment variables.

use std::path::PathBuf;

use crate::error::ConfigError;

const DEFAULT_PRIMARY_DB_FILE: &str = "rollbook.db";
const DEFAULT_FALLBACK_FILE: &str = "rollbook-fallback.json";
const DEFAULT_PHOTO_RETENTION_DAYS: u32 = 180;
const DEFAULT_RECORD_RETENTION_DAYS: u32 = 365;

/// Register storage configuration.
#[derive(Debug, Clone)]
pub struct RegisterConfig {
    /// Directory holding both store files.
    pub data_dir: PathBuf,
    /// File name of the primary libSQL database, relative to `data_dir`.
    pub primary_db_file: String,
    /// File name of the fallback flat store, relative to `data_dir`.
    pub fallback_file: String,
    /// Default age threshold for the photo-stripping sweep.
    pub photo_retention_days: u32,
    /// Default age threshold for the record-pruning sweep.
    pub record_retention_days: u32,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            primary_db_file: DEFAULT_PRIMARY_DB_FILE.to_string(),
            fallback_file: DEFAULT_FALLBACK_FILE.to_string(),
            photo_retention_days: DEFAULT_PHOTO_RETENTION_DAYS,
            record_retention_days: DEFAULT_RECORD_RETENTION_DAYS,
        }
    }
}

impl RegisterConfig {
    /// Resolve configuration from the environment, with platform defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            data_dir: optional_env("ROLLBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            primary_db_file: optional_env("ROLLBOOK_PRIMARY_DB")
                .unwrap_or(defaults.primary_db_file),
            fallback_file: optional_env("ROLLBOOK_FALLBACK_FILE")
                .unwrap_or(defaults.fallback_file),
            photo_retention_days: parse_days_env(
                "ROLLBOOK_PHOTO_RETENTION_DAYS",
                defaults.photo_retention_days,
            )?,
            record_retention_days: parse_days_env(
                "ROLLBOOK_RECORD_RETENTION_DAYS",
                defaults.record_retention_days,
            )?,
        })
    }

    pub fn primary_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.primary_db_file)
    }

    pub fn fallback_path(&self) -> PathBuf {
        self.data_dir.join(&self.fallback_file)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rollbook")
}

fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn parse_days_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => {
            let days: u32 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a whole number of days, got '{raw}'"),
            })?;
            if days == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "retention must be at least one day".to_string(),
                });
            }
            Ok(days)
        }
    }
}
