//! Inter-process communication for Lantern
//!
//! This crate provides the length-framed socket protocol spoken between the
//! launcher host and its extension processes, the message types carried by
//! it, and the extension-side client.

pub mod client;
pub mod codec;
pub mod error;
pub mod framer;
pub mod protocol;
pub mod signal;

// Re-export commonly used types
pub use client::{ExtensionClient, CODEC_ENV, EXTENSION_ID_ENV, SOCKET_ENV};
pub use codec::WireCodec;
pub use error::IpcError;
pub use framer::{
    encode_frame, encode_message, FrameDecoder, Framer, FramerEvent, FramerEventReceiver,
    FramerEventSender, FramerId, MAX_FRAME_SIZE,
};
pub use protocol::{
    Action, ExtensionEvent, ExtensionMessage, ExtensionResponse, Registration, ResultItem,
    SOCKET_CONNECTED,
};
pub use signal::{FramerSignal, HandlerId, Signals};
