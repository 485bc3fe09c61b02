//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};
use std::path::Path;

/// Longest path a Unix socket address can hold, including the trailing NUL
pub const MAX_SOCKET_PATH_LEN: usize = 108;

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate a dotted numeric version such as `2` or `2.1`
pub fn validate_version(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(value, field_name, domain)?;

    if value.split('.').any(|part| part.parse::<u64>().is_err()) {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} must be dot-separated numbers like 2.0, got '{}'",
                field_name, value
            ),
        });
    }
    Ok(())
}

/// Validate that a path fits into a Unix socket address
pub fn validate_socket_path(path: &Path, field_name: &str, domain: &str) -> ConfigResult<()> {
    let len = path.as_os_str().len();
    if len == 0 {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    if len >= MAX_SOCKET_PATH_LEN {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} is {} bytes long, socket paths must be shorter than {}",
                field_name, len, MAX_SOCKET_PATH_LEN
            ),
        });
    }
    Ok(())
}
