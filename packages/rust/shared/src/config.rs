//! Application configuration for LeadScout.
//!
//! User config lives at `~/.leadscout/leadscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichmentError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadscout";

// ---------------------------------------------------------------------------
// Config structs (matching leadscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Job queue and retry policy.
    #[serde(default)]
    pub queue: QueueSection,

    /// Worker pool sizing.
    #[serde(default)]
    pub worker: WorkerSection,

    /// Research loop settings.
    #[serde(default)]
    pub agent: AgentSection,

    /// Search backend selection.
    #[serde(default)]
    pub search: SearchSection,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. A leading `~/` expands to the home dir.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.leadscout/leadscout.db".into()
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Total processor attempts per job before it is failed permanently.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay; attempt `n` waits `base * 2^(n-1)` plus jitter.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// How long completed/failed jobs stay inspectable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Idle workers re-check the queue at this interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// An active job whose lease expires is handed out again.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            retention_secs: default_retention_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_retention_secs() -> u64 {
    3600
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_lease_secs() -> u64 {
    300
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Maximum jobs processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Grace period for active jobs on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_concurrency() -> u32 {
    5
}
fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// `[agent]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Upper bound on search rounds per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    /// Backend name. Only `mock` ships.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Simulated latency for the mock backend.
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            mock_latency_ms: default_mock_latency_ms(),
        }
    }
}

fn default_provider() -> String {
    "mock".into()
}
fn default_mock_latency_ms() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub retention: Duration,
    pub poll_interval: Duration,
    pub lease: Duration,
}

impl From<&AppConfig> for QueueConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.queue.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.queue.backoff_base_ms),
            retention: Duration::from_secs(config.queue.retention_secs),
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            lease: Duration::from_secs(config.queue.lease_secs),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub shutdown_timeout: Duration,
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.worker.concurrency.max(1) as usize,
            shutdown_timeout: Duration::from_secs(config.worker.shutdown_timeout_secs),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime research agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: u32,
}

impl From<&AppConfig> for AgentConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EnrichmentError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadscout/leadscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnrichmentError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        EnrichmentError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnrichmentError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnrichmentError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnrichmentError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the configured database path, expanding a leading `~/`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = config.database.path.trim();
    if raw.is_empty() {
        return Err(EnrichmentError::config("database.path must not be empty"));
    }
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| EnrichmentError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_attempts"));
        assert!(toml_str.contains("mock"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.queue.max_attempts, 3);
        assert_eq!(parsed.worker.concurrency, 5);
        assert_eq!(parsed.agent.max_iterations, 5);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[queue]
max_attempts = 7

[search]
mock_latency_ms = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.queue.max_attempts, 7);
        assert_eq!(config.queue.backoff_base_ms, 1000);
        assert_eq!(config.search.provider, "mock");
        assert_eq!(config.search.mock_latency_ms, 0);
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let app = AppConfig::default();
        let queue = QueueConfig::from(&app);
        assert_eq!(queue.max_attempts, 3);
        assert_eq!(queue.backoff_base, Duration::from_secs(1));
        assert_eq!(queue.retention, Duration::from_secs(3600));

        let worker = WorkerConfig::from(&app);
        assert_eq!(worker.concurrency, 5);
    }

    #[test]
    fn zero_values_are_clamped() {
        let mut app = AppConfig::default();
        app.queue.max_attempts = 0;
        app.worker.concurrency = 0;
        assert_eq!(QueueConfig::from(&app).max_attempts, 1);
        assert_eq!(WorkerConfig::from(&app).concurrency, 1);
    }

    #[test]
    fn database_path_plain_and_empty() {
        let mut app = AppConfig::default();
        app.database.path = "/tmp/leadscout.db".into();
        assert_eq!(
            database_path(&app).expect("path"),
            PathBuf::from("/tmp/leadscout.db")
        );

        app.database.path = "  ".into();
        assert!(database_path(&app).is_err());
    }
}
