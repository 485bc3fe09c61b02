//! Domain-specific configuration modules

pub mod extensions;
pub mod logging;
pub mod runtime;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Lantern configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LanternConfig {
    /// Socket server, timers and restart policy
    pub runtime: runtime::RuntimeConfig,

    /// Extension discovery and launch settings
    pub extensions: extensions::ExtensionsConfig,

    /// Logging configuration
    pub logging: logging::LoggingConfig,
}

impl LanternConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.runtime.validate()?;
        self.extensions.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = LanternConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
