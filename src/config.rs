//! Configuration management for the LGTM client
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{LgtmError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
///
/// Holds the agent endpoints, session defaults, and cache policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend endpoint configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Session defaults
    #[serde(default)]
    pub session: SessionConfig,
    /// Cache staleness and refresh policy
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Backend endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL for agent endpoints (`/list-apps`, `/run`, sessions, ...)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Root URL for the images endpoint (`{root}/v1/images`)
    #[serde(default = "default_base_root")]
    pub base_root: String,

    /// Upper bound for each request/response call (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Connect timeout, also applied to the streaming channel (seconds)
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Longest silence tolerated on a streamed run once its trigger has
    /// been accepted (seconds)
    #[serde(default = "default_stream_idle_seconds")]
    pub stream_idle_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/v1/agent".to_string()
}

fn default_base_root() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_stream_idle_seconds() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            base_root: default_base_root(),
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            stream_idle_seconds: default_stream_idle_seconds(),
        }
    }
}

impl ApiConfig {
    /// Request timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Stream idle timeout as a `Duration`
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_seconds)
    }
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Agent application the sessions belong to
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Fixed user id; a random one is generated per launch when unset
    #[serde(default)]
    pub user_id: Option<String>,

    /// Create sessions with client-assigned ids instead of server-assigned ones
    #[serde(default)]
    pub client_assigned_ids: bool,
}

fn default_app_name() -> String {
    "gopher-lgtm-image-generator-agent".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            user_id: None,
            client_assigned_ids: false,
        }
    }
}

/// Cache staleness and refresh policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a fetched session stays fresh (seconds)
    #[serde(default = "default_session_stale_seconds")]
    pub session_stale_seconds: u64,

    /// How long the app listing stays fresh (seconds)
    #[serde(default = "default_apps_stale_seconds")]
    pub apps_stale_seconds: u64,

    /// Fixed refresh interval of the image history listing (seconds)
    #[serde(default = "default_images_refresh_seconds")]
    pub images_refresh_seconds: u64,
}

fn default_session_stale_seconds() -> u64 {
    30
}

fn default_apps_stale_seconds() -> u64 {
    300
}

fn default_images_refresh_seconds() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_stale_seconds: default_session_stale_seconds(),
            apps_stale_seconds: default_apps_stale_seconds(),
            images_refresh_seconds: default_images_refresh_seconds(),
        }
    }
}

impl CacheConfig {
    /// Session staleness window
    pub fn session_stale_after(&self) -> Duration {
        Duration::from_secs(self.session_stale_seconds)
    }

    /// App listing staleness window
    pub fn apps_stale_after(&self) -> Duration {
        Duration::from_secs(self.apps_stale_seconds)
    }

    /// Image history refresh interval
    pub fn images_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.images_refresh_seconds)
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LgtmError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| LgtmError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("LGTM_API_BASE_URL") {
            tracing::debug!(base_url = %base_url, "Env override: LGTM_API_BASE_URL");
            self.api.base_url = base_url;
        }

        if let Ok(base_root) = std::env::var("LGTM_API_BASE_ROOT") {
            tracing::debug!(base_root = %base_root, "Env override: LGTM_API_BASE_ROOT");
            self.api.base_root = base_root;
        }

        if let Ok(timeout) = std::env::var("LGTM_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(v) => self.api.timeout_seconds = v,
                Err(_) => tracing::warn!("Invalid LGTM_TIMEOUT_SECONDS: {}", timeout),
            }
        }

        if let Ok(app_name) = std::env::var("LGTM_APP_NAME") {
            self.session.app_name = app_name;
        }

        if let Ok(user_id) = std::env::var("LGTM_USER_ID") {
            self.session.user_id = Some(user_id);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(base_url) = &cli.base_url {
            self.api.base_url = base_url.clone();
        }
        if let Some(app) = &cli.app {
            self.session.app_name = app.clone();
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        validate_http_url("api.base_url", &self.api.base_url)?;
        validate_http_url("api.base_root", &self.api.base_root)?;

        if self.api.timeout_seconds == 0 {
            return Err(LgtmError::Config(
                "api.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.api.connect_timeout_seconds == 0 {
            return Err(LgtmError::Config(
                "api.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.api.stream_idle_seconds == 0 {
            return Err(LgtmError::Config(
                "api.stream_idle_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.app_name.trim().is_empty() {
            return Err(
                LgtmError::Config("session.app_name cannot be empty".to_string()).into(),
            );
        }

        if matches!(&self.session.user_id, Some(id) if id.trim().is_empty()) {
            return Err(
                LgtmError::Config("session.user_id cannot be empty when set".to_string()).into(),
            );
        }

        if self.cache.session_stale_seconds == 0
            || self.cache.apps_stale_seconds == 0
            || self.cache.images_refresh_seconds == 0
        {
            return Err(LgtmError::Config(
                "cache intervals must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| LgtmError::Config(format!("{} is not a valid URL ({}): {}", field, value, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(LgtmError::Config(format!(
            "{} must use http or https, got {}",
            field,
            parsed.scheme()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "LGTM_API_BASE_URL",
            "LGTM_API_BASE_ROOT",
            "LGTM_TIMEOUT_SECONDS",
            "LGTM_APP_NAME",
            "LGTM_USER_ID",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8080/v1/agent");
        assert_eq!(config.api.base_root, "http://localhost:8080");
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.session.app_name, "gopher-lgtm-image-generator-agent");
        assert_eq!(config.cache.session_stale_seconds, 30);
        assert_eq!(config.cache.apps_stale_seconds, 300);
        assert_eq!(config.cache.images_refresh_seconds, 60);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_url() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_non_http_scheme() {
        let mut config = Config::default();
        config.api.base_root = "ftp://localhost".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.api.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_stream_idle() {
        let mut config = Config::default();
        config.api.stream_idle_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api.stream_idle_seconds"));
    }

    #[test]
    fn test_config_validation_empty_app_name() {
        let mut config = Config::default();
        config.session.app_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_cache_interval() {
        let mut config = Config::default();
        config.cache.images_refresh_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml_partial_uses_defaults() {
        let yaml = r#"
api:
  base_url: "https://agent.example/v1/agent"
session:
  client_assigned_ids: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "https://agent.example/v1/agent");
        assert_eq!(config.api.base_root, "http://localhost:8080");
        assert!(config.session.client_assigned_ids);
        assert_eq!(config.cache.apps_stale_seconds, 300);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_falls_back_to_defaults() {
        clear_env();
        let cli = Cli::try_parse_from(["lgtm-client", "apps"]).unwrap();
        let config = Config::load("/nonexistent/lgtm.yaml", &cli).unwrap();
        assert_eq!(config.api.base_url, default_base_url());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "session:\n  app_name: other-agent\n").unwrap();

        let cli = Cli::try_parse_from(["lgtm-client", "apps"]).unwrap();
        let config = Config::load(path.to_str().unwrap(), &cli).unwrap();
        assert_eq!(config.session.app_name, "other-agent");
    }

    #[test]
    #[serial]
    fn test_load_rejects_malformed_file() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api: [not, a, map]\n").unwrap();

        let cli = Cli::try_parse_from(["lgtm-client", "apps"]).unwrap();
        let err = Config::load(path.to_str().unwrap(), &cli).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_apply() {
        clear_env();
        std::env::set_var("LGTM_API_BASE_URL", "http://agent:9000/v1/agent");
        std::env::set_var("LGTM_API_BASE_ROOT", "http://agent:9000");
        std::env::set_var("LGTM_TIMEOUT_SECONDS", "5");
        std::env::set_var("LGTM_USER_ID", "user-fixed");

        let cli = Cli::try_parse_from(["lgtm-client", "apps"]).unwrap();
        let config = Config::load("/nonexistent/lgtm.yaml", &cli).unwrap();
        clear_env();

        assert_eq!(config.api.base_url, "http://agent:9000/v1/agent");
        assert_eq!(config.api.base_root, "http://agent:9000");
        assert_eq!(config.api.timeout_seconds, 5);
        assert_eq!(config.session.user_id.as_deref(), Some("user-fixed"));
    }

    #[test]
    #[serial]
    fn test_invalid_env_timeout_is_ignored() {
        clear_env();
        std::env::set_var("LGTM_TIMEOUT_SECONDS", "soon");

        let cli = Cli::try_parse_from(["lgtm-client", "apps"]).unwrap();
        let config = Config::load("/nonexistent/lgtm.yaml", &cli).unwrap();
        clear_env();

        assert_eq!(config.api.timeout_seconds, 30);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_win_over_env() {
        clear_env();
        std::env::set_var("LGTM_APP_NAME", "from-env");

        let cli = Cli::try_parse_from(["lgtm-client", "--app", "from-cli", "apps"]).unwrap();
        let config = Config::load("/nonexistent/lgtm.yaml", &cli).unwrap();
        clear_env();

        assert_eq!(config.session.app_name, "from-cli");
    }
}
