// Drive Client Configuration Module
// Persistent client configuration storage

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::ApiError;

/// Environment variable that overrides the configured API base URL
pub const API_URL_ENV: &str = "DRIVE_API_URL";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the storage API (e.g., https://drive.example.com/api/)
    pub api_base_url: String,
    /// Per-request timeout in seconds (0 = no timeout)
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Where the CLI keeps the token pair between runs.
    /// None = `<config_dir>/drive-client/session.json`
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("drive-client/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api/".to_string(),
            request_timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            token_file: None,
        }
    }
}

impl ClientConfig {
    /// Resolved token file location
    pub fn token_path(&self) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| config_dir().join("session.json"))
    }

    /// Base URL with the trailing slash `Url::join` needs to keep the last segment
    pub fn normalized_base_url(&self) -> String {
        let trimmed = self.api_base_url.trim();
        if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{}/", trimmed)
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("drive-client")
}

/// Get the path to the client config file
pub fn get_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load client configuration from disk, applying the environment override
pub fn load_client_config() -> ClientConfig {
    let mut config = load_client_config_from(&get_config_path());
    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            config.api_base_url = url;
        }
    }
    config
}

/// Load configuration from an explicit path; falls back to defaults
pub fn load_client_config_from(config_path: &std::path::Path) -> ClientConfig {
    if config_path.exists() {
        match fs::read_to_string(config_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse client config: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read client config: {}", e);
            }
        }
    }

    ClientConfig::default()
}

/// Save client configuration to disk
pub fn save_client_config(config: &ClientConfig, config_path: &std::path::Path) -> Result<(), ApiError> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content)?;

    tracing::info!("Client config saved to {:?}", config_path);
    Ok(())
}

/// Validate client configuration
pub fn validate_config(config: &ClientConfig) -> Result<(), ApiError> {
    let url = url::Url::parse(config.api_base_url.trim())
        .map_err(|e| ApiError::InvalidConfig(format!("Invalid API base URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::InvalidConfig(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ApiError::InvalidConfig("User agent cannot be empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.user_agent.starts_with("drive-client/"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_config() {
        let mut config = ClientConfig::default();

        config.api_base_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());

        config.api_base_url = "ftp://drive.example.com/".to_string();
        assert!(validate_config(&config).is_err());

        config.api_base_url = "https://drive.example.com/api".to_string();
        assert!(validate_config(&config).is_ok());

        config.user_agent = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_normalized_base_url() {
        let config = ClientConfig {
            api_base_url: "https://drive.example.com/api".to_string(),
            ..Default::default()
        };
        assert_eq!(config.normalized_base_url(), "https://drive.example.com/api/");
    }

    #[test]
    fn test_load_missing_and_broken_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_client_config_from(&path);
        assert_eq!(config.api_base_url, ClientConfig::default().api_base_url);

        fs::write(&path, "{ not json").unwrap();
        let config = load_client_config_from(&path);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ClientConfig {
            api_base_url: "https://drive.example.com/api/".to_string(),
            request_timeout_secs: 5,
            ..Default::default()
        };
        save_client_config(&config, &path).unwrap();

        let loaded = load_client_config_from(&path);
        assert_eq!(loaded.api_base_url, "https://drive.example.com/api/");
        assert_eq!(loaded.request_timeout_secs, 5);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base_url":"https://x.example/api/"}"#).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.token_file.is_none());
    }
}
