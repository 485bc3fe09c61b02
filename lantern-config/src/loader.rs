//! Configuration loading and environment variable handling

use crate::domains::extensions::ExtensionsConfig;
use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::runtime::RuntimeConfig;
use crate::domains::utils::parse_millis;
use crate::domains::LanternConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "LANTERN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<LanternConfig> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut config: LanternConfig = serde_yaml::from_str(&content)?;

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config)?;

        // Validate all domains
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<LanternConfig> {
        let mut config = LanternConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<LanternConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut LanternConfig) -> ConfigResult<()> {
        self.apply_runtime_overrides(&mut config.runtime)?;
        self.apply_extensions_overrides(&mut config.extensions)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply runtime config overrides
    fn apply_runtime_overrides(&self, config: &mut RuntimeConfig) -> ConfigResult<()> {
        if let Ok(socket_path) = self.get_env_var("SOCKET_PATH") {
            config.socket_path = PathBuf::from(socket_path);
        }

        if let Ok(codec) = self.get_env_var("CODEC") {
            config.codec = codec
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid CODEC: {}", e)))?;
        }

        if let Ok(delay) = self.get_env_var("LOADING_DELAY_MS") {
            config.loading_delay = parse_millis(&delay)
                .map_err(|e| ConfigError::EnvError(format!("Invalid LOADING_DELAY_MS: {}", e)))?;
        }

        Ok(())
    }

    /// Apply extensions config overrides
    fn apply_extensions_overrides(&self, config: &mut ExtensionsConfig) -> ConfigResult<()> {
        if let Ok(dirs) = self.get_env_var("EXTENSION_DIRS") {
            config.directories = std::env::split_paths(&dirs)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect();
        }

        if let Ok(version) = self.get_env_var("HOST_API_VERSION") {
            config.host_api_version = version;
        }

        if let Ok(interpreter) = self.get_env_var("INTERPRETER") {
            config.interpreter = interpreter;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
