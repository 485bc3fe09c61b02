//! Extension discovery and process environment configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, validate_version, Validatable};

/// Where extensions live and how they are launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directories scanned for extension subdirectories, in priority order
    pub directories: Vec<PathBuf>,

    /// Extension API version the host implements
    pub host_api_version: String,

    /// Interpreter used when a manifest has no `command`
    pub interpreter: String,

    /// Extra module search path handed to extension processes
    pub module_search_path: Vec<PathBuf>,

    /// Module namespace of the host itself; a missing module under it means
    /// the extension relies on host internals
    pub host_namespace: String,

    /// Ask extensions for verbose logging
    pub verbose: bool,
}

/// `$XDG_DATA_HOME/lantern/extensions`
pub fn default_extension_dirs() -> Vec<PathBuf> {
    dirs::data_dir()
        .map(|dir| vec![dir.join("lantern").join("extensions")])
        .unwrap_or_default()
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            directories: default_extension_dirs(),
            host_api_version: "2.0".to_string(),
            interpreter: "python3".to_string(),
            module_search_path: Vec::new(),
            host_namespace: "lantern".to_string(),
            verbose: false,
        }
    }
}

impl Validatable for ExtensionsConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_version(&self.host_api_version, "host_api_version", self.domain_name())?;
        validate_required_string(&self.interpreter, "interpreter", self.domain_name())?;
        validate_required_string(&self.host_namespace, "host_namespace", self.domain_name())?;

        if self.directories.iter().any(|dir| dir.as_os_str().is_empty()) {
            return Err(self.validation_error("directories cannot contain an empty path"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "extensions"
    }
}
