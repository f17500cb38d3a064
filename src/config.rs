//! Configuration file parser for ~/.config/newsfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed, but a value is out of range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Relative paths resolve against the config directory.
    pub database_path: String,

    /// Log level used when RUST_LOG is unset.
    pub log_level: String,

    pub matching: MatchingConfig,
    pub retention: RetentionConfig,
    pub feed: FeedSettings,
}

/// Scheduled preference matching.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Only articles created within this many days are eligible.
    pub lookback_days: u32,

    /// Maximum feed entries added per user per run.
    pub per_user_limit: usize,

    /// Users matched in parallel.
    pub concurrency: usize,

    /// Minutes between scheduled runs.
    pub interval_minutes: u64,

    /// Wall-clock budget for one run, in seconds.
    pub run_budget_secs: u64,
}

/// Scheduled pruning of old feed entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Entries older than this many days are deleted.
    pub horizon_days: u32,

    /// UTC wall-clock time of the daily run, "HH:MM".
    pub daily_at: String,
}

/// Feed retrieval paging.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeedSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "newsfeed.db".to_string(),
            log_level: "info".to_string(),
            matching: MatchingConfig::default(),
            retention: RetentionConfig::default(),
            feed: FeedSettings::default(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            per_user_limit: 100,
            concurrency: 4,
            interval_minutes: 60,
            run_budget_secs: 50 * 60,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            daily_at: "02:00".to_string(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            default_page_size: 15,
            max_page_size: 100,
        }
    }
}

impl RetentionConfig {
    /// Parsed `daily_at`
    pub fn daily_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M").map_err(|_| {
            ConfigError::Invalid(format!(
                "retention.daily_at must be HH:MM, got '{}'",
                self.daily_at
            ))
        })
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to bound memory use
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "log_level",
                "matching",
                "retention",
                "feed",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), database = %config.database_path, "Loaded configuration");
        Ok(config)
    }

    /// Reject values the engines cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matching.per_user_limit == 0 {
            return Err(ConfigError::Invalid(
                "matching.per_user_limit must be at least 1".to_string(),
            ));
        }
        if self.matching.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "matching.concurrency must be at least 1".to_string(),
            ));
        }
        if self.matching.interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "matching.interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.matching.run_budget_secs == 0 {
            return Err(ConfigError::Invalid(
                "matching.run_budget_secs must be at least 1".to_string(),
            ));
        }
        if self.feed.default_page_size == 0 || self.feed.max_page_size == 0 {
            return Err(ConfigError::Invalid(
                "feed page sizes must be at least 1".to_string(),
            ));
        }
        if self.feed.default_page_size > self.feed.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "feed.default_page_size ({}) exceeds feed.max_page_size ({})",
                self.feed.default_page_size, self.feed.max_page_size
            )));
        }
        self.retention.daily_time()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::Builder::new().prefix(name).tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "newsfeed.db");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.matching.lookback_days, 7);
        assert_eq!(config.matching.per_user_limit, 100);
        assert_eq!(config.matching.interval_minutes, 60);
        assert_eq!(config.retention.horizon_days, 30);
        assert_eq!(config.retention.daily_at, "02:00");
        assert_eq!(config.feed.default_page_size, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.matching.per_user_limit, 100);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (_dir, path) = write_config("empty", "");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.retention.horizon_days, 30);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("partial", "[matching]\nlookback_days = 3\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.matching.lookback_days, 3);
        assert_eq!(config.matching.per_user_limit, 100); // default
        assert_eq!(config.retention.horizon_days, 30); // default
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/newsfeed/feed.db"
log_level = "debug"

[matching]
lookback_days = 14
per_user_limit = 50
concurrency = 8
interval_minutes = 30
run_budget_secs = 600

[retention]
horizon_days = 60
daily_at = "03:30"

[feed]
default_page_size = 20
max_page_size = 50
"#;
        let (_dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/newsfeed/feed.db");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.matching.lookback_days, 14);
        assert_eq!(config.matching.per_user_limit, 50);
        assert_eq!(config.matching.concurrency, 8);
        assert_eq!(config.matching.interval_minutes, 30);
        assert_eq!(config.matching.run_budget_secs, 600);
        assert_eq!(config.retention.horizon_days, 60);
        assert_eq!(
            config.retention.daily_time().unwrap(),
            NaiveTime::from_hms_opt(3, 30, 0).unwrap()
        );
        assert_eq!(
            config.feed,
            FeedSettings {
                default_page_size: 20,
                max_page_size: 50
            }
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config(
            "unknown",
            "log_level = \"warn\"\ntotally_fake_key = \"should not fail\"\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("wrongtype", "[matching]\nlookback_days = \"seven\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let (_dir, path) = write_config("zerolimit", "[matching]\nper_user_limit = 0\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("per_user_limit"));
    }

    #[test]
    fn test_malformed_daily_at_rejected() {
        let (_dir, path) = write_config("dailyat", "[retention]\ndaily_at = \"2am\"\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_default_page_size_above_max_rejected() {
        let (_dir, path) = write_config(
            "pagesize",
            "[feed]\ndefault_page_size = 200\nmax_page_size = 100\n",
        );
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config("toolarge", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }
}
