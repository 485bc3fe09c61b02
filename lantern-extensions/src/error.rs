//! Error types for the extension runtime

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::identity::ExtensionId;

/// Manifest loading and validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse manifest {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Extension manifest is missing required field(s): \"{0}\"")]
    MissingFields(String),

    #[error("Invalid triggers in extension manifest: {0}")]
    InvalidTrigger(String),

    #[error("Invalid preferences in extension manifest: {0}")]
    InvalidPreference(String),

    #[error("Invalid option in extension manifest: {0}")]
    InvalidOption(String),

    #[error("{name} does not support Lantern API v{host_version} (requires {required})")]
    Incompatible {
        name: String,
        host_version: String,
        required: String,
    },
}

impl ManifestError {
    /// Classification recorded in the extension's error slot
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ManifestError::Incompatible { .. } => ErrorKind::IncompatibleVersion,
            _ => ErrorKind::InvalidManifest,
        }
    }
}

/// Source strings that cannot be turned into an extension identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid extension URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid extension directory {0}")]
    InvalidPath(String),
}

/// Errors returned by runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Extension {0} is already running")]
    AlreadyRunning(ExtensionId),

    #[error("Extension {0} is not running")]
    NotRunning(ExtensionId),

    #[error("Extension server is already running")]
    ServerAlreadyRunning,

    #[error("Extension server is not running")]
    ServerNotRunning,

    #[error("Extension {0} was not found in any extension directory")]
    ExtensionNotFound(ExtensionId),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Failed to spawn extension {ext_id}: {message}")]
    Spawn { ext_id: ExtensionId, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extension runtime has shut down")]
    Shutdown,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Why an extension is not running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Killed by a signal
    Terminated,
    /// Exited before it could start serving
    ExitedInstantly,
    /// Crashed after running for a while; restarted automatically
    ExitedAfterRunning,
    /// A module the extension imports is not installed
    MissingDependency,
    /// The extension imports host internals that no longer exist
    IncompatibleInternals,
    IncompatibleVersion,
    InvalidManifest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Terminated => "Terminated",
            ErrorKind::ExitedInstantly => "ExitedInstantly",
            ErrorKind::ExitedAfterRunning => "ExitedAfterRunning",
            ErrorKind::MissingDependency => "MissingDependency",
            ErrorKind::IncompatibleInternals => "IncompatibleInternals",
            ErrorKind::IncompatibleVersion => "IncompatibleVersion",
            ErrorKind::InvalidManifest => "InvalidManifest",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last recorded failure of an extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExtensionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&ManifestError> for ExtensionError {
    fn from(err: &ManifestError) -> Self {
        ExtensionError::new(err.error_kind(), err.to_string())
    }
}
