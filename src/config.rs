use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the local record; the platform data dir when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// When set, the local record is sealed with this passphrase.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            file_name: default_file_name(),
            passphrase: None,
        }
    }
}

fn default_file_name() -> String {
    "cycle-tracker-v4.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Base URL of the sync server, e.g. `http://localhost:4173`. Sync is off when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            debounce_ms: default_debounce_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    650
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecommendationConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    140
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShareConfig {
    #[serde(default = "default_share_base_url")]
    pub base_url: String,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: default_share_base_url(),
            window_days: default_window_days(),
            max_cycles: default_max_cycles(),
        }
    }
}

fn default_share_base_url() -> String {
    "http://localhost:4173/".to_string()
}

fn default_window_days() -> i64 {
    120
}

fn default_max_cycles() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Env (`CYCLEFLOW__SECTION__KEY`) over file over defaults.
    pub fn load(config_path: Option<String>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_file_path = config_path
            .or_else(|| env::var("CYCLEFLOW_CONFIG").ok())
            .unwrap_or_else(|| "config/default.toml".to_string());

        if std::path::Path::new(&config_file_path).exists() {
            builder = builder.add_source(File::with_name(&config_file_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CYCLEFLOW")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(api_key) = env::var("CYCLEFLOW_GROQ_KEY") {
            builder = builder.set_override("recommendation.api_key", api_key)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.storage.file_name.trim().is_empty() {
            return Err("storage.file_name must not be empty".to_string());
        }
        if self.remote.debounce_ms == 0 {
            return Err("remote.debounce_ms must be greater than 0".to_string());
        }
        if self.share.window_days <= 0 {
            return Err("share.window_days must be greater than 0".to_string());
        }
        if self.share.max_cycles == 0 {
            return Err("share.max_cycles must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remote.debounce_ms, 650);
        assert_eq!(config.share.window_days, 120);
        assert_eq!(config.storage.file_name, "cycle-tracker-v4.json");
    }

    #[test]
    fn test_validation_zero_debounce() {
        let mut config = Config::default();
        config.remote.debounce_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_file_name() {
        let mut config = Config::default();
        config.storage.file_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycleflow.toml");
        std::fs::write(
            &path,
            "[share]\nwindow_days = 60\n\n[remote]\nbase_url = \"http://sync.local\"\n",
        )
        .unwrap();

        let config = Config::load(Some(path.to_string_lossy().into_owned())).unwrap();
        assert_eq!(config.share.window_days, 60);
        assert_eq!(config.share.max_cycles, 12);
        assert_eq!(config.remote.base_url.as_deref(), Some("http://sync.local"));
    }
}
