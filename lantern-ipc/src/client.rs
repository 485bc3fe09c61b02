//! Extension side of the socket protocol
//!
//! An extension process connects to the socket named in its environment,
//! identifies itself with a registration message and then answers events
//! until the host hangs up.

use log::{debug, info};
use serde::Serialize;
use std::path::Path;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::codec::WireCodec;
use crate::error::IpcError;
use crate::framer::{Framer, FramerEvent, FramerEventReceiver};
use crate::protocol::{Action, ExtensionEvent, ExtensionResponse, Registration};

/// Socket path handed to extension processes
pub const SOCKET_ENV: &str = "LANTERN_SOCKET";

/// Identity handed to extension processes
pub const EXTENSION_ID_ENV: &str = "EXTENSION_ID";

/// Payload codec handed to extension processes
pub const CODEC_ENV: &str = "LANTERN_WIRE_CODEC";

/// A registered connection to the host
#[derive(Debug)]
pub struct ExtensionClient {
    ext_id: String,
    framer: Framer<ExtensionEvent>,
    events: FramerEventReceiver<ExtensionEvent>,
    closed: bool,
}

impl ExtensionClient {
    /// Connect and register as `ext_id`
    pub async fn connect(
        socket_path: impl AsRef<Path>,
        ext_id: impl Into<String>,
        codec: WireCodec,
    ) -> Result<Self, IpcError> {
        let socket_path = socket_path.as_ref();
        let ext_id = ext_id.into();

        let stream = UnixStream::connect(socket_path).await?;
        let (tx, events) = mpsc::unbounded_channel();
        let framer = Framer::spawn(stream, codec, tx);
        framer.send(&Registration::new(ext_id.clone()));

        info!(
            "Extension {} connected to {} using {}",
            ext_id,
            socket_path.display(),
            codec
        );

        Ok(Self {
            ext_id,
            framer,
            events,
            closed: false,
        })
    }

    /// Connect using the variables the host sets for extension processes
    pub async fn from_env() -> Result<Self, IpcError> {
        let socket = required_env(SOCKET_ENV)?;
        let ext_id = required_env(EXTENSION_ID_ENV)?;
        let codec = match std::env::var(CODEC_ENV) {
            Ok(value) => value.parse()?,
            Err(_) => WireCodec::default(),
        };
        Self::connect(socket, ext_id, codec).await
    }

    pub fn ext_id(&self) -> &str {
        &self.ext_id
    }

    /// Wait for the next event; `None` once the connection is closed
    pub async fn next_event(&mut self) -> Option<ExtensionEvent> {
        if self.closed {
            return None;
        }
        match self.events.recv().await {
            Some((_, FramerEvent::MessageParsed(event))) => {
                debug!("Extension {} received {:?}", self.ext_id, event);
                Some(event)
            }
            Some((_, FramerEvent::Closed)) | None => {
                self.closed = true;
                None
            }
        }
    }

    /// Answer `event` with `action`
    pub fn respond(&self, event: ExtensionEvent, action: Action) {
        self.framer.send(&ExtensionResponse::new(event, action));
    }

    /// Write an arbitrary message, bypassing the response envelope
    pub fn send_raw<T: Serialize + ?Sized>(&self, message: &T) {
        self.framer.send(message);
    }

    pub fn close(&self) {
        self.framer.close();
    }
}

fn required_env(name: &str) -> Result<String, IpcError> {
    std::env::var(name).map_err(|_| IpcError::Environment(format!("{} is not set", name)))
}
