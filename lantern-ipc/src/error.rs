//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Length prefix announces a frame the peer is not allowed to send
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    /// Unknown payload codec name
    #[error("Unsupported wire codec: {0}")]
    UnsupportedCodec(String),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Required environment variable missing or malformed
    #[error("Environment error: {0}")]
    Environment(String),
}

impl IpcError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpcError::IoError(_) | IpcError::ConnectionClosed)
    }

    /// Check if this error must tear the connection down
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::FrameTooLarge { .. }
                | IpcError::DeserializationError(_)
                | IpcError::InvalidMessage(_)
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for IpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        IpcError::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        IpcError::DeserializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(IpcError::IoError("broken pipe".to_string()).is_retryable());
        assert!(IpcError::ConnectionClosed.is_retryable());
        assert!(!IpcError::FrameTooLarge { size: 10, max: 1 }.is_retryable());
        assert!(!IpcError::InvalidMessage("bad format".to_string()).is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(IpcError::FrameTooLarge { size: 10, max: 1 }.is_fatal());
        assert!(IpcError::DeserializationError("garbage".to_string()).is_fatal());
        assert!(!IpcError::IoError("network error".to_string()).is_fatal());
        assert!(!IpcError::ConnectionClosed.is_fatal());
    }

    #[test]
    fn test_json_syntax_error_is_deserialization() {
        let err = serde_json::from_slice::<serde_json::Value>(b"{nope").unwrap_err();
        assert!(matches!(IpcError::from(err), IpcError::DeserializationError(_)));
    }
}
