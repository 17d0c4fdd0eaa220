//! Configuration file parser for ~/.config/gator/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetcherOptions, InvalidDatePolicy, ParseOptions, DEFAULT_USER_AGENT};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `gator.db` next to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// User that commands act on, set by `login` and `register`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user: Option<String>,

    /// Bound on one feed request, connect to last byte.
    pub fetch_timeout_secs: u64,

    /// Default interval between scheduler ticks.
    pub scrape_interval_secs: u64,

    /// Maximum feeds ingested concurrently.
    pub workers: usize,

    pub user_agent: String,

    /// Feed documents larger than this are rejected.
    pub max_feed_bytes: usize,

    /// Keep items whose pubDate cannot be parsed, storing an unknown date.
    pub lenient_dates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            current_user: None,
            fetch_timeout_secs: 10,
            scrape_interval_secs: 60,
            workers: 4,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_feed_bytes: 10 * 1024 * 1024,
            lenient_dates: false,
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "db_path",
    "current_user",
    "fetch_timeout_secs",
    "scrape_interval_secs",
    "workers",
    "user_agent",
    "max_feed_bytes",
    "lenient_dates",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a corrupt file can't exhaust memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            user = config.current_user.as_deref().unwrap_or("-"),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Write the configuration to `path`.
    ///
    /// The file is written under a temporary name in the same directory and
    /// renamed over `path`, so readers never observe a partial file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
        let result = (|| {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&temp_path, path)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(ConfigError::Io(e));
        }

        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Database location, resolving the default relative to `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir.join("gator.db"))
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs.max(1))
    }

    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
            user_agent: self.user_agent.clone(),
            max_feed_size: self.max_feed_bytes,
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            invalid_dates: if self.lenient_dates {
                InvalidDatePolicy::Unknown
            } else {
                InvalidDatePolicy::Skip
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.db_path.is_none());
        assert!(config.current_user.is_none());
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.workers, 4);
        assert!(!config.lenient_dates);
        assert_eq!(config.parse_options().invalid_dates, InvalidDatePolicy::Skip);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("current_user = \"alice\"\nworkers = 2\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.current_user.as_deref(), Some("alice"));
        assert_eq!(config.workers, 2);
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.scrape_interval_secs, 60);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
db_path = "/var/lib/gator/gator.db"
current_user = "bob"
fetch_timeout_secs = 5
scrape_interval_secs = 30
workers = 8
user_agent = "custom/1.0"
max_feed_bytes = 1024
lenient_dates = true
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path(Path::new("/unused")),
            PathBuf::from("/var/lib/gator/gator.db")
        );
        assert_eq!(config.scrape_interval(), Duration::from_secs(30));

        let fetcher = config.fetcher_options();
        assert_eq!(fetcher.timeout, Duration::from_secs(5));
        assert_eq!(fetcher.user_agent, "custom/1.0");
        assert_eq!(fetcher.max_feed_size, 1024);
        assert_eq!(config.parse_options().invalid_dates, InvalidDatePolicy::Unknown);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("workers = \"many\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("workers = 3\ntheme = \"dark\"\n");
        assert_eq!(Config::load(&path).unwrap().workers, 3);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_save_then_load_keeps_current_user() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            current_user: Some("carol".to_string()),
            workers: 6,
            ..Config::default()
        };
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temporary file left behind: {leftovers:?}");
    }

    #[test]
    fn test_save_overwrites_existing() {
        let (_dir, path) = write_config("current_user = \"alice\"\n");

        let mut config = Config::load(&path).unwrap();
        config.current_user = Some("dave".to_string());
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap().current_user.as_deref(), Some("dave"));
    }

    #[test]
    fn test_default_database_path_in_config_dir() {
        let config = Config::default();
        assert_eq!(
            config.database_path(Path::new("/home/u/.config/gator")),
            PathBuf::from("/home/u/.config/gator/gator.db")
        );
    }
}
