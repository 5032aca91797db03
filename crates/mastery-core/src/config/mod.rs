//! Configuration system for mastery.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MasteryError, MasteryResult};

/// How the sync coordinator recognizes notifications caused by its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EchoDetection {
    /// A change written within `echo_window_ms` of our last save is ours.
    #[default]
    TimeWindow,
    /// A change carrying a write token we recently wrote is ours.
    WriteToken,
}

/// Retry policy for remote writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay (milliseconds).
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0_f32,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given first delay, keeping the other defaults.
    pub fn with_initial_delay(initial_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            ..Default::default()
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Sync coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Window inside which a remote change counts as our own echo.
    pub echo_window_ms: i64,
    /// Echo recognition strategy.
    pub echo_detection: EchoDetection,
    /// Retry policy for remote writes.
    pub retry: RetryPolicy,
    /// Local key for guest (signed-out) state.
    pub guest_data_key: String,
    /// Local key for the uid-tagged backup written while offline.
    pub pending_backup_key: String,
    /// How many recent write tokens to remember.
    pub write_token_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: 2_000,
            echo_detection: EchoDetection::TimeWindow,
            retry: RetryPolicy::default(),
            guest_data_key: "guest_data".to_string(),
            pending_backup_key: "pending_sync_backup".to_string(),
            write_token_history: 16,
        }
    }
}

/// Spaced-repetition parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrsConfig {
    /// Ease factor of a new item.
    pub initial_ease: f64,
    /// Lower bound for the ease factor.
    pub min_ease: f64,
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            initial_ease: 2.5,
            min_ease: 1.3,
        }
    }
}

/// Trash lifecycle parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrashConfig {
    /// Days a deleted item stays restorable.
    pub retention_days: i64,
    /// Interval between background sweeps in minutes.
    pub sweep_interval_minutes: u64,
    /// Minimum seconds between two sweeps.
    pub min_sweep_gap_secs: i64,
    /// Whether the sweeper runs once when started.
    pub sweep_on_start: bool,
    /// Title of the course created for quizzes whose course no longer exists.
    pub fallback_course_title: String,
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            retention_days: crate::types::TRASH_RETENTION_DAYS,
            sweep_interval_minutes: 60,
            min_sweep_gap_secs: 10,
            sweep_on_start: true,
            fallback_course_title: "Restored Quizzes".to_string(),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryConfig {
    pub sync: SyncConfig,
    pub srs: SrsConfig,
    pub trash: TrashConfig,
    /// Path of the SQLite file backing the local durable store.
    pub local_db_path: PathBuf,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        let mastery_dir = dirs::home_dir()
            .map(|h| h.join(".mastery"))
            .unwrap_or_else(|| PathBuf::from(".mastery"));

        Self {
            sync: SyncConfig::default(),
            srs: SrsConfig::default(),
            trash: TrashConfig::default(),
            local_db_path: mastery_dir.join("local.db"),
        }
    }
}

impl MasteryConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> MasteryResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| MasteryError::Configuration(e.to_string()))
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| MasteryError::Configuration(e.to_string())),
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| MasteryError::Configuration(e.to_string())),
            _ => Err(MasteryError::Configuration(
                "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads:
    /// - `MASTERY_LOCAL_DB_PATH`
    /// - `MASTERY_ECHO_WINDOW_MS` (default: 2000)
    /// - `MASTERY_ECHO_DETECTION` (`time_window` or `write_token`)
    /// - `MASTERY_MAX_RETRIES` (default: 3)
    /// - `MASTERY_RETRY_INITIAL_DELAY_MS` (default: 1000)
    /// - `MASTERY_TRASH_RETENTION_DAYS` (default: 30)
    /// - `MASTERY_SWEEP_INTERVAL_MINUTES` (default: 60)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MASTERY_LOCAL_DB_PATH") {
            config.local_db_path = PathBuf::from(path);
        }
        if let Some(ms) = env_parse("MASTERY_ECHO_WINDOW_MS") {
            config.sync.echo_window_ms = ms;
        }
        if let Ok(mode) = std::env::var("MASTERY_ECHO_DETECTION") {
            config.sync.echo_detection = match mode.to_lowercase().as_str() {
                "write_token" | "token" => EchoDetection::WriteToken,
                _ => EchoDetection::TimeWindow,
            };
        }
        if let Some(retries) = env_parse("MASTERY_MAX_RETRIES") {
            config.sync.retry.max_retries = retries;
        }
        if let Some(ms) = env_parse("MASTERY_RETRY_INITIAL_DELAY_MS") {
            config.sync.retry.initial_delay_ms = ms;
        }
        if let Some(days) = env_parse("MASTERY_TRASH_RETENTION_DAYS") {
            config.trash.retention_days = days;
        }
        if let Some(minutes) = env_parse::<u64>("MASTERY_SWEEP_INTERVAL_MINUTES") {
            config.trash.sweep_interval_minutes = minutes.max(1);
        }

        config
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> MasteryConfigBuilder {
        MasteryConfigBuilder::default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Builder for MasteryConfig.
#[derive(Default)]
pub struct MasteryConfigBuilder {
    config: MasteryConfig,
}

impl MasteryConfigBuilder {
    /// Set sync configuration.
    pub fn sync(mut self, config: SyncConfig) -> Self {
        self.config.sync = config;
        self
    }

    /// Set the retry policy for remote writes.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.sync.retry = policy;
        self
    }

    /// Set echo detection strategy.
    pub fn echo_detection(mut self, mode: EchoDetection) -> Self {
        self.config.sync.echo_detection = mode;
        self
    }

    /// Set SRS parameters.
    pub fn srs(mut self, config: SrsConfig) -> Self {
        self.config.srs = config;
        self
    }

    /// Set trash configuration.
    pub fn trash(mut self, config: TrashConfig) -> Self {
        self.config.trash = config;
        self
    }

    /// Set local database path.
    pub fn local_db_path(mut self, path: PathBuf) -> Self {
        self.config.local_db_path = path;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> MasteryConfig {
        self.config
    }
}
