//! Configuration management for chatterm.
//!
//! Configuration is loaded once at startup from a TOML file. The lookup order is
//! an explicit `--config` path, then `./config.toml`, then
//! `~/.config/chatterm/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up in the working directory and config dir.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the completion service (e.g. https://api.openai.com/v1).
    #[serde(alias = "endpoint")]
    pub api_url: String,
    /// Bearer credential sent with every request.
    pub api_key: String,
    /// Model identifier passed through to the endpoint.
    pub model: String,
    /// Stream replies token by token instead of waiting for the full reply.
    #[serde(default = "default_true")]
    pub stream: bool,
    /// System message prepended to every request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            stream: true,
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_true() -> bool {
    true
}

/// A config document that parsed but cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("`api_url` must start with http:// or https://, got `{0}`")]
    InvalidUrl(String),
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("chatterm"))
            .context("Could not determine config directory")
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Get the default log file path.
    pub fn log_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("chatterm")
            .join("chatterm.log")
    }

    /// Resolve which config file to use.
    ///
    /// An explicit path always wins, even if it does not exist, so that a typo
    /// is reported instead of silently falling back.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }
        Self::config_path()
    }

    /// Load and validate the configuration. A missing file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(explicit)?;
        Self::load_from(&path)
    }

    /// Load and validate the configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse a TOML document and validate it.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would only fail later at request time.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let url = self.api_url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyField("api_url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.api_url.clone()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::EmptyField("api_key"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyField("model"));
        }
        Ok(())
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Mode label shown in the UI title.
    pub fn mode_label(&self) -> &'static str {
        if self.stream {
            "streaming"
        } else {
            "single-shot"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
api_url = "https://api.example.com/v1"
api_key = "sk-test"
model = "gpt-4o-mini"
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = Config::parse(VALID).unwrap();
        assert_eq!(config.api_url, "https://api.example.com/v1");
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(config.stream);
        assert_eq!(config.system_prompt, "You are a helpful assistant.");
    }

    #[test]
    fn test_endpoint_alias() {
        let toml = r#"
endpoint = "http://localhost:8080/v1"
api_key = "local"
model = "llama3"
stream = false
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.api_url, "http://localhost:8080/v1");
        assert!(!config.stream);
        assert_eq!(config.mode_label(), "single-shot");
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let toml = r#"
api_url = "https://api.example.com/v1"
model = "gpt-4o-mini"
"#;
        let err = Config::parse(toml).unwrap_err();
        assert!(format!("{:#}", err).contains("api_key"));
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let toml = r#"
api_url = "https://api.example.com/v1"
api_key = "   "
model = "gpt-4o-mini"
"#;
        let err = Config::parse(toml).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::EmptyField("api_key"))
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = Config {
            api_url: "api.example.com".to_string(),
            api_key: "sk".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidUrl("api.example.com".to_string()))
        );
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(Config::parse("api_url = ").is_err());
    }

    #[test]
    fn test_default_config_needs_api_key() {
        assert_eq!(
            Config::default().validate(),
            Err(ConfigError::EmptyField("api_key"))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, VALID).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_save_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            api_key: "sk-saved".to_string(),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api_key, "sk-saved");
        assert_eq!(loaded.api_url, default_api_url());
    }
}
