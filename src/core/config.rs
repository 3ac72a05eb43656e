use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::core::auth::{
    ChainedCredentialProvider, CredentialProvider, FileCredentialProvider,
    KeychainCredentialProvider,
};
use crate::core::history::HistoryStore;
use crate::core::providers::fetch::validate_endpoint;

pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub notify_at_80_percent: bool,
}

fn default_format() -> String {
    "text".to_string()
}
fn default_color() -> String {
    "auto".to_string()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            color: default_color(),
            poll_interval_secs: default_poll_interval(),
            notify_at_80_percent: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_source")]
    pub source: String,
    pub path: Option<PathBuf>,
}

fn default_source() -> String {
    "auto".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("claudemon").join("config.toml")
    }

    /// Load config from the default path, falling back to defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize and write this config to the config file path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn history_path(&self) -> PathBuf {
        self.history
            .path
            .clone()
            .unwrap_or_else(HistoryStore::default_path)
    }

    /// Build the credential source described by `[credentials]`.
    pub fn credential_provider(&self) -> Arc<dyn CredentialProvider> {
        let file: Arc<dyn CredentialProvider> = Arc::new(FileCredentialProvider::new(
            self.credentials
                .path
                .clone()
                .unwrap_or_else(FileCredentialProvider::default_path),
        ));
        match self.credentials.source.as_str() {
            "file" => file,
            "keychain" => Arc::new(KeychainCredentialProvider::default()),
            _ if KeychainCredentialProvider::is_available() => Arc::new(
                ChainedCredentialProvider::new(vec![
                    Arc::new(KeychainCredentialProvider::default()),
                    file,
                ]),
            ),
            _ => file,
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !["text", "json"].contains(&self.settings.default_format.as_str()) {
            issues.push(format!(
                "Invalid default_format: '{}' (must be 'text' or 'json')",
                self.settings.default_format
            ));
        }
        if !["auto", "always", "never"].contains(&self.settings.color.as_str()) {
            issues.push(format!(
                "Invalid color: '{}' (must be 'auto', 'always', or 'never')",
                self.settings.color
            ));
        }
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS)
            .contains(&self.settings.poll_interval_secs)
        {
            issues.push(format!(
                "Invalid poll_interval_secs: {} (must be {}..={})",
                self.settings.poll_interval_secs, MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
            ));
        }
        if !["auto", "file", "keychain"].contains(&self.credentials.source.as_str()) {
            issues.push(format!(
                "Invalid credentials source: '{}' (must be auto|file|keychain)",
                self.credentials.source
            ));
        }
        if let Some(endpoint) = &self.api.endpoint {
            if let Err(e) = validate_endpoint(endpoint) {
                issues.push(format!("api.endpoint: {}", e));
            }
        }
        issues
    }
}
