//! Domain-driven configuration management for Lantern
//!
//! This crate provides configuration split by functional domain (runtime,
//! extensions, logging), with validation, defaults, and environment variable
//! support.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    extensions::ExtensionsConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    runtime::{RestartConfig, RuntimeConfig},
    LanternConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration, serde_duration_millis};
