use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

pub const CONFIG_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct LocalizationConfig {
    #[serde(default = "default_max_parallel_languages")]
    pub max_parallel_languages: usize,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Base URL of the translation service. Jobs are refused while unset.
    #[serde(default)]
    pub translation_endpoint: Option<String>,
    /// Base URL of the transcription service used for subtitles.
    #[serde(default)]
    pub transcription_endpoint: Option<String>,
}

fn default_max_parallel_languages() -> usize {
    3
}

fn default_provider_timeout_secs() -> u64 {
    120
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            max_parallel_languages: default_max_parallel_languages(),
            provider_timeout_secs: default_provider_timeout_secs(),
            translation_endpoint: None,
            transcription_endpoint: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3040
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    /// Days added to an occurrence date to get its due date.
    #[serde(default = "default_due_grace_days")]
    pub due_grace_days: i64,
    /// Applied to talks created without their own watch threshold.
    #[serde(default = "default_min_video_watch_percent")]
    pub default_min_video_watch_percent: i32,
    #[serde(default = "default_schedule_poll_interval_secs")]
    pub schedule_poll_interval_secs: u64,
    #[serde(default = "default_overdue_sweep_interval_secs")]
    pub overdue_sweep_interval_secs: u64,
    #[serde(default)]
    pub localization: LocalizationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_config_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_due_grace_days() -> i64 {
    7
}

fn default_min_video_watch_percent() -> i32 {
    90
}

fn default_schedule_poll_interval_secs() -> u64 {
    300
}

fn default_overdue_sweep_interval_secs() -> u64 {
    900
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            due_grace_days: default_due_grace_days(),
            default_min_video_watch_percent: default_min_video_watch_percent(),
            schedule_poll_interval_secs: default_schedule_poll_interval_secs(),
            overdue_sweep_interval_secs: default_overdue_sweep_interval_secs(),
            localization: LocalizationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl From<String> for Config {
    fn from(raw_config: String) -> Self {
        match serde_json::from_str::<Config>(&raw_config) {
            Ok(mut config) => {
                if config.config_version != CONFIG_VERSION {
                    tracing::info!(
                        from = %config.config_version,
                        "Config upgraded to {}",
                        CONFIG_VERSION
                    );
                    config.config_version = CONFIG_VERSION.to_string();
                }
                config
            }
            Err(e) => {
                tracing::warn!("Config parse failed: {}, using default", e);
                Self::default()
            }
        }
    }
}

/// Loads the config at `path`, writing defaults back when the file is absent.
pub async fn load_config_from_file(path: &Path) -> Config {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Config::from(raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let config = Config::default();
            if let Err(e) = save_config_to_file(&config, path).await {
                tracing::warn!(path = %path.display(), "Failed to write default config: {}", e);
            }
            config
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to read config: {}, using default", e);
            Config::default()
        }
    }
}

pub async fn save_config_to_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}
