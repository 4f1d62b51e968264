//! Configuration loading and validation
//!
//! One immutable [`Config`] is constructed at process startup (TOML file
//! first, then `FINSIGHT_*` environment overrides) and handed by
//! constructor to every component that needs it. Nothing reads
//! configuration ambiently after startup.
//!
//! Resolution priority per field:
//! 1. Environment variable (highest)
//! 2. TOML config file
//! 3. Compiled default
//!
//! The config file is looked up at `$FINSIGHT_CONFIG`, then
//! `~/.config/finsight/finsight.toml`, then `/etc/finsight/finsight.toml`.
//! A missing file is not an error; missing vision or language-model
//! credentials are (fatal at startup, reported all at once).

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default HTTP bind address for the ingest service
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5780";

/// Default event bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Service configuration, fully resolved
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Root directory for object storage and the database file
    pub data_dir: PathBuf,
    /// SQLite database file path (defaults to `<data_dir>/finsight.db`)
    pub database_path: PathBuf,
    /// Event bus channel capacity
    pub event_capacity: usize,
    pub vision: VisionConfig,
    pub language_model: LanguageModelConfig,
    pub queue: QueueConfig,
}

/// Vision analysis service credentials
#[derive(Debug, Clone, Default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub key: String,
}

/// Language-model vision service credentials
#[derive(Debug, Clone)]
pub struct LanguageModelConfig {
    pub endpoint: String,
    pub key: String,
    /// Model deployment name, e.g. "gpt-4o"
    pub deployment: String,
    pub api_version: String,
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: String::new(),
            deployment: String::new(),
            api_version: "2024-04-01-preview".to_string(),
        }
    }
}

/// Job queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker tasks spawned per queue
    pub workers_per_queue: usize,
    /// Idle poll interval when a queue is empty
    pub poll_interval_ms: u64,
    /// Lease granted to a dequeued job; expiry without ack redelivers
    pub lease_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers_per_queue: 2,
            poll_interval_ms: 500,
            lease_ms: 60_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        let database_path = data_dir.join("finsight.db");
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            data_dir,
            database_path,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            vision: VisionConfig::default(),
            language_model: LanguageModelConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// On-disk TOML schema; every field optional
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_address: Option<String>,
    data_dir: Option<PathBuf>,
    database_path: Option<PathBuf>,
    event_capacity: Option<usize>,
    #[serde(default)]
    vision: FileVision,
    #[serde(default)]
    language_model: FileLanguageModel,
    #[serde(default)]
    queue: FileQueue,
}

#[derive(Debug, Default, Deserialize)]
struct FileVision {
    endpoint: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLanguageModel {
    endpoint: Option<String>,
    key: Option<String>,
    deployment: Option<String>,
    api_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileQueue {
    workers_per_queue: Option<usize>,
    poll_interval_ms: Option<u64>,
    lease_ms: Option<i64>,
}

impl Config {
    /// Load configuration from the default file location (if any) and the
    /// process environment. Call [`Config::validate`] before using the
    /// external service credentials.
    pub fn load() -> Result<Config> {
        let env = |key: &str| std::env::var(key).ok();
        let path = env("FINSIGHT_CONFIG").map(PathBuf::from).or_else(default_config_path);

        let mut config = match path {
            Some(ref p) if p.exists() => Config::from_file(p)?,
            _ => Config::default(),
        };
        config.apply_env_overrides(env)?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file
    pub fn from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Config::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, filling defaults for absent fields
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let file: FileConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;

        let mut config = Config::default();
        if let Some(v) = file.bind_address {
            config.bind_address = v;
        }
        if let Some(v) = file.data_dir {
            config.database_path = v.join("finsight.db");
            config.data_dir = v;
        }
        if let Some(v) = file.database_path {
            config.database_path = v;
        }
        if let Some(v) = file.event_capacity {
            config.event_capacity = v;
        }
        if let Some(v) = file.vision.endpoint {
            config.vision.endpoint = v;
        }
        if let Some(v) = file.vision.key {
            config.vision.key = v;
        }
        if let Some(v) = file.language_model.endpoint {
            config.language_model.endpoint = v;
        }
        if let Some(v) = file.language_model.key {
            config.language_model.key = v;
        }
        if let Some(v) = file.language_model.deployment {
            config.language_model.deployment = v;
        }
        if let Some(v) = file.language_model.api_version {
            config.language_model.api_version = v;
        }
        if let Some(v) = file.queue.workers_per_queue {
            config.queue.workers_per_queue = v;
        }
        if let Some(v) = file.queue.poll_interval_ms {
            config.queue.poll_interval_ms = v;
        }
        if let Some(v) = file.queue.lease_ms {
            config.queue.lease_ms = v;
        }
        Ok(config)
    }

    /// Apply `FINSIGHT_*` overrides. `get` abstracts the environment so
    /// tests can inject values without touching process state.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("FINSIGHT_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = get("FINSIGHT_DATA_DIR") {
            let dir = PathBuf::from(v);
            self.database_path = dir.join("finsight.db");
            self.data_dir = dir;
        }
        if let Some(v) = get("FINSIGHT_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("FINSIGHT_VISION_ENDPOINT") {
            self.vision.endpoint = v;
        }
        if let Some(v) = get("FINSIGHT_VISION_KEY") {
            self.vision.key = v;
        }
        if let Some(v) = get("FINSIGHT_LM_ENDPOINT") {
            self.language_model.endpoint = v;
        }
        if let Some(v) = get("FINSIGHT_LM_KEY") {
            self.language_model.key = v;
        }
        if let Some(v) = get("FINSIGHT_LM_DEPLOYMENT") {
            self.language_model.deployment = v;
        }
        if let Some(v) = get("FINSIGHT_LM_API_VERSION") {
            self.language_model.api_version = v;
        }
        if let Some(v) = get("FINSIGHT_QUEUE_WORKERS") {
            self.queue.workers_per_queue = parse_env("FINSIGHT_QUEUE_WORKERS", &v)?;
        }
        if let Some(v) = get("FINSIGHT_QUEUE_POLL_INTERVAL_MS") {
            self.queue.poll_interval_ms = parse_env("FINSIGHT_QUEUE_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("FINSIGHT_QUEUE_LEASE_MS") {
            self.queue.lease_ms = parse_env("FINSIGHT_QUEUE_LEASE_MS", &v)?;
        }
        Ok(())
    }

    /// Verify every required external-service credential is present.
    ///
    /// Reports all missing keys in one error so an operator fixes the
    /// config in one pass instead of replaying startup per field.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if !is_present(&self.vision.endpoint) {
            missing.push("vision.endpoint (FINSIGHT_VISION_ENDPOINT)");
        }
        if !is_present(&self.vision.key) {
            missing.push("vision.key (FINSIGHT_VISION_KEY)");
        }
        if !is_present(&self.language_model.endpoint) {
            missing.push("language_model.endpoint (FINSIGHT_LM_ENDPOINT)");
        }
        if !is_present(&self.language_model.key) {
            missing.push("language_model.key (FINSIGHT_LM_KEY)");
        }
        if !is_present(&self.language_model.deployment) {
            missing.push("language_model.deployment (FINSIGHT_LM_DEPLOYMENT)");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Missing required configuration:\n  - {}",
                missing.join("\n  - ")
            )))
        }
    }
}

fn is_present(value: &str) -> bool {
    !value.trim().is_empty()
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {:?}", name, value)))
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("finsight").join("finsight.toml"));
    if let Some(ref path) = user_config {
        if path.exists() {
            return user_config;
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/finsight/finsight.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    user_config
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("finsight"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/finsight"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_absent_fields() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.queue.workers_per_queue, 2);
        assert_eq!(config.queue.lease_ms, 60_000);
        assert_eq!(config.language_model.api_version, "2024-04-01-preview");
        assert!(config.database_path.ends_with("finsight.db"));
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            bind_address = "0.0.0.0:8080"
            data_dir = "/srv/finsight"

            [vision]
            endpoint = "https://vision.example.test"
            key = "abc123"

            [queue]
            workers_per_queue = 4
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("/srv/finsight"));
        assert_eq!(config.database_path, PathBuf::from("/srv/finsight/finsight.db"));
        assert_eq!(config.vision.endpoint, "https://vision.example.test");
        assert_eq!(config.queue.workers_per_queue, 4);
        // untouched sections keep defaults
        assert_eq!(config.queue.poll_interval_ms, 500);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let toml = r#"
            [vision]
            endpoint = "https://from-file.test"
            key = "file-key"
        "#;
        let mut config = Config::from_toml_str(toml).unwrap();
        config
            .apply_env_overrides(|key| match key {
                "FINSIGHT_VISION_ENDPOINT" => Some("https://from-env.test".to_string()),
                "FINSIGHT_QUEUE_WORKERS" => Some("8".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.vision.endpoint, "https://from-env.test");
        assert_eq!(config.vision.key, "file-key");
        assert_eq!(config.queue.workers_per_queue, 8);
    }

    #[test]
    fn unparseable_numeric_override_is_a_config_error() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| match key {
            "FINSIGHT_QUEUE_WORKERS" => Some("many".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn validate_reports_every_missing_credential_at_once() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("vision.endpoint"));
        assert!(message.contains("vision.key"));
        assert!(message.contains("language_model.endpoint"));
        assert!(message.contains("language_model.key"));
        assert!(message.contains("language_model.deployment"));
    }

    #[test]
    fn validate_passes_with_full_credentials() {
        let toml = r#"
            [vision]
            endpoint = "https://vision.example.test"
            key = "vk"

            [language_model]
            endpoint = "https://lm.example.test"
            key = "lk"
            deployment = "gpt-4o"
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn whitespace_credential_counts_as_missing() {
        let toml = r#"
            [vision]
            endpoint = "https://vision.example.test"
            key = "   "
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vision.key"));
    }
}
