//! Run configuration.
//!
//! Every tunable of the batch job lives here as a named option with a default
//! that matches the reference policy. A JSON file may override any subset of
//! fields; there are no command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "titlecheck";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TITLECHECK_CONFIG";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "titlecheck.json";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "titlecheck_lib=info,titlecheck=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub model: ModelConfig,
    pub policy: PolicyConfig,
    pub watchdog: WatchdogConfig,
    /// Number of data rows used for the progress percentage.
    /// None = count the input file at startup.
    pub total_titles: Option<u64>,
}

/// Locations of every file the job reads or writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub titles_csv: PathBuf,
    pub moderation_db: PathBuf,
    pub prompt_template: PathBuf,
    pub output_csv: PathBuf,
    pub checkpoint: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            titles_csv: PathBuf::from("titles.csv"),
            moderation_db: PathBuf::from("titleVotes.sqlite3"),
            prompt_template: PathBuf::from("prompt.txt"),
            output_csv: PathBuf::from("title_scores.csv"),
            checkpoint: PathBuf::from("progress.txt"),
        }
    }
}

/// Inference endpoint and generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model_name: String,
    /// Hard bound on a single scoring call.
    pub timeout_secs: u64,
    pub num_ctx: u32,
    /// 0.0 keeps scores reproducible across resumed runs.
    pub temperature: f32,
    /// Send an empty generate request before the batch so the first title
    /// does not pay the model load time against its timeout.
    pub warm_up: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model_name: "gemma3:27b".to_string(),
            timeout_secs: 60,
            num_ctx: 3000,
            temperature: 0.0,
            warm_up: true,
        }
    }
}

/// Skip and acceptance policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Scores below this are discarded instead of written to the output.
    pub min_score: i64,
    /// Titles whose net vote score is at or below this are skipped as downvoted.
    pub downvote_floor: i64,
    /// Pause after a non-timeout inference failure.
    pub failure_backoff_ms: u64,
    /// Stop the run after this many non-timeout failures in a row.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_score: 1,
            downvote_floor: -2,
            failure_backoff_ms: 1000,
            max_consecutive_failures: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Continuous time on battery before the process is killed.
    pub battery_limit_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 10,
            battery_limit_secs: 600,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl AppConfig {
    /// Parse a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config for this run.
    ///
    /// Priority:
    /// 1. `TITLECHECK_CONFIG` env var (must point at a readable file)
    /// 2. `titlecheck.json` in the working directory, if it exists
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            tracing::info!(path = %path, "Loading config from {CONFIG_ENV_VAR}");
            return Self::from_file(Path::new(&path));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            tracing::info!(path = %local.display(), "Loading config file");
            return Self::from_file(local);
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.model_name is empty".into()));
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid("model.timeout_secs must be > 0".into()));
        }
        if !(self.model.base_url.starts_with("http://")
            || self.model.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "model.base_url must start with http:// or https://, got '{}'",
                self.model.base_url
            )));
        }
        if self.watchdog.enabled && self.watchdog.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "watchdog.poll_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}
