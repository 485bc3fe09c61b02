//! Registration server
//!
//! Accepts connections on the extension socket and keeps each one pending
//! until it sends its registration message. A registered connection is
//! handed over to a controller together with the identity it presented.

use lantern_ipc::{
    ExtensionMessage, Framer, FramerEventSender, FramerId, FramerSignal, HandlerId, WireCodec,
};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::identity::ExtensionId;

/// Socket file mode; only the owning user may connect
const SOCKET_PERMISSIONS: u32 = 0o600;

/// Who handles a framer signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscriber {
    Server,
    Controller(ExtensionId),
}

/// Host side of an extension connection
pub type Connection = Framer<ExtensionMessage, Subscriber>;

/// Accepted streams, posted by the acceptor task
pub type IncomingSender = mpsc::UnboundedSender<UnixStream>;
pub type IncomingReceiver = mpsc::UnboundedReceiver<UnixStream>;

/// Accepted connection that has not registered yet
#[derive(Debug)]
pub struct PendingConnection {
    framer: Connection,
    message_handler: HandlerId,
    closed_handler: HandlerId,
}

impl PendingConnection {
    /// Release the connection from the server's handlers
    fn into_framer(self) -> Connection {
        let mut framer = self.framer;
        framer.disconnect(self.message_handler);
        framer.disconnect(self.closed_handler);
        framer
    }
}

#[derive(Debug)]
pub struct RegistrationServer {
    codec: WireCodec,
    socket_path: Option<PathBuf>,
    acceptor: Option<JoinHandle<()>>,
    pending: HashMap<FramerId, PendingConnection>,
}

impl RegistrationServer {
    pub fn new(codec: WireCodec) -> Self {
        Self {
            codec,
            socket_path: None,
            acceptor: None,
            pending: HashMap::new(),
        }
    }

    pub fn codec(&self) -> WireCodec {
        self.codec
    }

    pub fn is_running(&self) -> bool {
        self.acceptor.is_some()
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Bind `path` and start accepting; accepted streams go to `incoming`
    pub fn start(&mut self, path: &Path, incoming: IncomingSender) -> RuntimeResult<()> {
        if self.is_running() {
            return Err(RuntimeError::ServerAlreadyRunning);
        }

        let listener = bind_socket(path)?;
        for (_, pending) in self.pending.drain() {
            pending.framer.close();
        }

        info!("Extension server listening on {}", path.display());
        self.acceptor = Some(tokio::spawn(accept_loop(listener, incoming)));
        self.socket_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Stop accepting and remove the socket file
    ///
    /// Registered connections stay open.
    pub fn stop(&mut self) -> RuntimeResult<()> {
        let acceptor = self.acceptor.take().ok_or(RuntimeError::ServerNotRunning)?;
        acceptor.abort();

        if let Some(path) = self.socket_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove socket {}: {}", path.display(), e);
            }
            info!("Extension server on {} stopped", path.display());
        }
        Ok(())
    }

    /// Wrap an accepted stream and wait for its registration
    pub fn on_incoming(
        &mut self,
        stream: UnixStream,
        events: &FramerEventSender<ExtensionMessage>,
    ) -> FramerId {
        let mut framer = Connection::spawn(stream, self.codec, events.clone());
        let message_handler = framer.connect(FramerSignal::MessageParsed, Subscriber::Server);
        let closed_handler = framer.connect(FramerSignal::Closed, Subscriber::Server);
        let id = framer.id();

        debug!("Accepted connection {}, waiting for registration", id);
        self.pending.insert(
            id,
            PendingConnection {
                framer,
                message_handler,
                closed_handler,
            },
        );
        id
    }

    /// Handle a message on a pending connection
    ///
    /// Returns the released connection and the identity it registered as.
    pub fn on_message(
        &mut self,
        framer_id: FramerId,
        message: ExtensionMessage,
    ) -> Option<(Connection, ExtensionId)> {
        if !self.pending.contains_key(&framer_id) {
            return None;
        }
        let Some(ext_id) = message.registration_id().map(ExtensionId::from) else {
            warn!(
                "Ignoring message from unregistered connection {}: {:?}",
                framer_id, message
            );
            return None;
        };

        let pending = self.pending.remove(&framer_id)?;
        info!("Extension {} registered on {}", ext_id, framer_id);
        Some((pending.into_framer(), ext_id))
    }

    /// A pending connection went away before registering
    pub fn on_pending_closed(&mut self, framer_id: FramerId) -> bool {
        let removed = self.pending.remove(&framer_id).is_some();
        if removed {
            debug!("Pending connection {} closed", framer_id);
        }
        removed
    }

    /// Signal subscribers of a pending connection
    pub fn subscribers(&self, framer_id: FramerId, signal: FramerSignal) -> Vec<Subscriber> {
        self.pending
            .get(&framer_id)
            .map(|pending| pending.framer.subscribers(signal))
            .unwrap_or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for RegistrationServer {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

/// Bind with owner-only permissions, replacing a stale socket file
fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        debug!("Removing stale socket {}", path.display());
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_PERMISSIONS))?;
    Ok(listener)
}

async fn accept_loop(listener: UnixListener, incoming: IncomingSender) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                if incoming.send(stream).is_err() {
                    debug!("Runtime is gone, stopping acceptor");
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to accept extension connection: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
