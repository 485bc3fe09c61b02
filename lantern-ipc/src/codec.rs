//! Payload codecs
//!
//! The framing layer is codec-agnostic: every frame is a length prefix plus a
//! payload, and the payload is produced by one of the codecs below. A server
//! picks one codec at start-up and uses it for every connection it accepts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IpcError;

/// Payload encoding used inside frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    /// Portable structured encoding for the current extension API
    #[default]
    Json,
    /// MessagePack with named fields, kept for legacy extensions
    #[serde(alias = "messagepack")]
    Msgpack,
}

impl WireCodec {
    /// Encode a value into a payload
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, IpcError> {
        match self {
            WireCodec::Json => Ok(serde_json::to_vec(value)?),
            WireCodec::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    /// Decode a payload into a value
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, IpcError> {
        match self {
            WireCodec::Json => Ok(serde_json::from_slice(payload)?),
            WireCodec::Msgpack => Ok(rmp_serde::from_slice(payload)?),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WireCodec::Json => "json",
            WireCodec::Msgpack => "msgpack",
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireCodec {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(WireCodec::Json),
            "msgpack" | "messagepack" => Ok(WireCodec::Msgpack),
            other => Err(IpcError::UnsupportedCodec(other.to_string())),
        }
    }
}
