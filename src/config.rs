//! Configuration for the editing core.
//!
//! Loaded from a TOML file under the XDG config directory; every field
//! has a default, so a missing or partial file works.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use vellum_search::SearchConfig;

/// Core configuration with nested sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Insertion cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Search engine settings
    #[serde(default)]
    pub search: SearchSettings,

    /// Dump file storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Insertion cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Global byte budget shared by all windows
    #[serde(default = "default_cache_budget")]
    pub budget_bytes: u64,
}

/// Search engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// First chunk size of an expanding scan window
    #[serde(default = "default_initial_chunk")]
    pub initial_chunk_bytes: u64,

    /// Chunk size ceiling
    #[serde(default = "default_max_chunk")]
    pub max_chunk_bytes: u64,

    /// Result cap on each side of the scan origin
    #[serde(default = "default_max_results")]
    pub max_results_per_direction: usize,

    /// Consumer poll granularity in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Dump file storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for per-window dump files (default: XDG data dir)
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log file path (None disables logging)
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Minimum log level (debug, info, warn, error)
    #[serde(default = "default_min_level")]
    pub min_level: String,

    /// Log entries kept in memory for diagnostics
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

// Default value functions for serde

fn default_cache_budget() -> u64 {
    16 * 1024 * 1024
}

fn default_initial_chunk() -> u64 {
    64 * 1024
}

fn default_max_chunk() -> u64 {
    1024 * 1024
}

fn default_max_results() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_min_level() -> String {
    "info".to_string()
}

fn default_max_entries() -> usize {
    200
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            budget_bytes: default_cache_budget(),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            initial_chunk_bytes: default_initial_chunk(),
            max_chunk_bytes: default_max_chunk(),
            max_results_per_direction: default_max_results(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file_path: None,
            min_level: default_min_level(),
            max_entries: default_max_entries(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from the default XDG location (`config.toml` under the
    /// vellum config dir), falling back to defaults when the file does
    /// not exist.
    pub fn load_default() -> Result<Self> {
        let path = crate::xdg::get_config_dir()?.join("config.toml");
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// The directory dump files go to.
    pub fn dump_dir(&self) -> Result<PathBuf> {
        match &self.storage.dump_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::xdg::get_dump_dir(),
        }
    }

    /// Search engine tuning derived from this config.
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            initial_chunk: self.search.initial_chunk_bytes,
            max_chunk: self.search.max_chunk_bytes,
            max_results_per_direction: self.search.max_results_per_direction,
            poll_interval: Duration::from_millis(self.search.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.cache.budget_bytes, 16 * 1024 * 1024);
        assert_eq!(config.search.max_results_per_direction, 1000);
        assert!(config.logging.file_path.is_none());
    }

    #[test]
    fn test_partial_toml_fills_missing_fields() {
        let config: CoreConfig = toml::from_str(
            r#"
            [cache]
            budget_bytes = 1024

            [search]
            max_results_per_direction = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.budget_bytes, 1024);
        assert_eq!(config.search.max_results_per_direction, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.search.initial_chunk_bytes, 64 * 1024);
        assert_eq!(config.logging.min_level, "info");
    }

    #[test]
    fn test_load_missing_file_errors_with_path() {
        let err = CoreConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not/here.toml"));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = CoreConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let reparsed: CoreConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.cache.budget_bytes, config.cache.budget_bytes);
    }
}
