//! Persistent CLI configuration.

use std::env;
use std::path::{Path, PathBuf};

use errand_core::util::{is_http_url, normalize_text_option};
use errand_core::SyncQueueConfig;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub queue: SyncQueueConfig,
}

const fn default_config_version() -> u32 {
    1
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("errand")
}

pub fn default_config_path() -> PathBuf {
    app_dir(dirs::config_dir()).join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    app_dir(dirs::data_dir()).join("errand.db")
}

impl CliConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self {
                version: default_config_version(),
                ..Self::default()
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        config
            .queue
            .validate()
            .map_err(|error| format!("Invalid queue settings in {}: {}", path.display(), error))?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Backend URL from `ERRAND_API_BASE_URL`, else the config file
    pub fn api_base_url(&self) -> Option<String> {
        normalize_text_option(env::var("ERRAND_API_BASE_URL").ok())
            .or_else(|| normalize_text_option(self.api_base_url.clone()))
    }

    /// Bearer token from `ERRAND_API_TOKEN`, else the config file
    pub fn api_token(&self) -> Option<String> {
        normalize_text_option(env::var("ERRAND_API_TOKEN").ok())
            .or_else(|| normalize_text_option(self.api_token.clone()))
    }

    /// `--db-path`, then `ERRAND_DB_PATH`, then the config file, then the
    /// platform data directory
    pub fn resolve_db_path(&self, cli_db_path: Option<PathBuf>) -> PathBuf {
        cli_db_path
            .or_else(|| env::var_os("ERRAND_DB_PATH").map(PathBuf::from))
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(default_db_path)
    }

    /// Copy with the token masked, for display
    pub fn redacted(&self) -> Self {
        let mut redacted = self.clone();
        if redacted.api_token.is_some() {
            redacted.api_token = Some("<redacted>".to_string());
        }
        redacted
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_token = normalize_text_option(self.api_token.take());
    }
}

pub fn normalize_api_base_url(value: String) -> Result<String, String> {
    let value = value.trim().trim_end_matches('/').to_string();
    if is_http_url(&value) {
        Ok(value)
    } else {
        Err(format!(
            "API base URL must start with http:// or https:// (got '{value}')"
        ))
    }
}
