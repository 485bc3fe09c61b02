//! Length-prefixed framing over a Unix stream
//!
//! Each frame is a native-endian `u32` byte count followed by that many bytes
//! of payload. [`FrameDecoder`] reassembles frames from arbitrarily chopped
//! reads; [`Framer`] owns a connection, runs one reader and one writer task
//! for it, and reports what it parsed as [`FramerEvent`]s on a channel.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Notify};

use crate::codec::WireCodec;
use crate::error::IpcError;
use crate::signal::{FramerSignal, HandlerId, Signals};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a peer may announce
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes requested per socket read
pub const READ_SIZE: usize = 65_000;

static NEXT_FRAMER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique framer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramerId(u64);

impl FramerId {
    /// Allocate an id no other framer in this process has
    pub fn next() -> Self {
        FramerId(NEXT_FRAMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FramerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "framer-{}", self.0)
    }
}

/// Prepend the length prefix to a payload
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, IpcError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_slice(&(payload.len() as u32).to_ne_bytes());
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Encode a message and frame it in one step
pub fn encode_message<T: Serialize + ?Sized>(
    codec: WireCodec,
    message: &T,
) -> Result<Bytes, IpcError> {
    let payload = codec.encode(message)?;
    encode_frame(&payload)
}

/// Reassembles frames from a byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
    partial_reads: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
            partial_reads: 0,
        }
    }

    /// Append freshly read bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame, if the buffer holds one
    ///
    /// An oversized length prefix is a fatal protocol error; the decoder must
    /// not be used afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, IpcError> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            if !self.buffer.is_empty() {
                self.partial_reads += 1;
            }
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
        let size = u32::from_ne_bytes(prefix) as usize;
        if size > self.max_frame_size {
            return Err(IpcError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let available = self.buffer.len() - LENGTH_PREFIX_SIZE;
        if size > available {
            debug!("Waiting for {} bytes of {} bytes", size - available, size);
            self.partial_reads += 1;
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(size).freeze()))
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of times a read ended in the middle of a frame
    pub fn partial_reads(&self) -> u64 {
        self.partial_reads
    }
}

/// Notifications emitted by a framer
#[derive(Debug, Clone, PartialEq)]
pub enum FramerEvent<M> {
    MessageParsed(M),
    /// Emitted exactly once, after which the framer emits nothing else
    Closed,
}

impl<M> FramerEvent<M> {
    pub fn signal(&self) -> FramerSignal {
        match self {
            FramerEvent::MessageParsed(_) => FramerSignal::MessageParsed,
            FramerEvent::Closed => FramerSignal::Closed,
        }
    }
}

/// Channel every framer reports into
pub type FramerEventSender<M> = mpsc::UnboundedSender<(FramerId, FramerEvent<M>)>;
pub type FramerEventReceiver<M> = mpsc::UnboundedReceiver<(FramerId, FramerEvent<M>)>;

#[derive(Default)]
struct Shutdown {
    closing: AtomicBool,
    stop_reader: Notify,
    stop_writer: Notify,
}

impl Shutdown {
    /// Returns true for the caller that started the close
    fn begin(&self) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stop_reader.notify_one();
        self.stop_writer.notify_one();
        true
    }
}

/// A framed connection
///
/// `M` is the inbound message type, `S` the subscriber token stored in the
/// framer's signal table.
pub struct Framer<M, S = ()> {
    id: FramerId,
    codec: WireCodec,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: Arc<Shutdown>,
    signals: Signals<S>,
    _inbound: PhantomData<fn() -> M>,
}

impl<M, S> Framer<M, S>
where
    M: DeserializeOwned + Send + 'static,
    S: Clone,
{
    /// Take ownership of `stream` and start its reader and writer tasks
    pub fn spawn(stream: UnixStream, codec: WireCodec, events: FramerEventSender<M>) -> Self {
        let id = FramerId::next();
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Shutdown::default());

        tokio::spawn(write_loop(id, write_half, outbound_rx, shutdown.clone()));
        tokio::spawn(read_loop(id, read_half, codec, events, shutdown.clone()));

        Self {
            id,
            codec,
            outbound,
            shutdown,
            signals: Signals::new(),
            _inbound: PhantomData,
        }
    }

    pub fn id(&self) -> FramerId {
        self.id
    }

    pub fn codec(&self) -> WireCodec {
        self.codec
    }

    /// Queue a message; frames leave in the order they were queued
    ///
    /// Never fails: encode errors are logged and the message is dropped, and
    /// transport errors close the connection.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) {
        if self.is_closing() {
            debug!("Connection {} is closing, dropping outbound message", self.id);
            return;
        }
        match encode_message(self.codec, message) {
            Ok(frame) => {
                if self.outbound.send(frame).is_err() {
                    debug!("Writer for {} is gone, dropping outbound message", self.id);
                }
            }
            Err(e) => error!("Failed to encode message for {}: {}", self.id, e),
        }
    }

    /// Start closing the connection; repeated calls are no-ops
    pub fn close(&self) {
        if self.shutdown.begin() {
            debug!("Starting to close connection {}", self.id);
        } else {
            debug!("Connection {} already closing", self.id);
        }
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.closing.load(Ordering::SeqCst)
    }

    pub fn connect(&mut self, signal: FramerSignal, subscriber: S) -> HandlerId {
        self.signals.connect(signal, subscriber)
    }

    pub fn disconnect(&mut self, handler: HandlerId) -> bool {
        self.signals.disconnect(handler)
    }

    /// Current subscribers of `signal`
    pub fn subscribers(&self, signal: FramerSignal) -> Vec<S> {
        self.signals.subscribers(signal)
    }
}

impl<M, S> fmt::Debug for Framer<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framer")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field("closing", &self.shutdown.closing.load(Ordering::SeqCst))
            .finish()
    }
}

async fn read_loop<M: DeserializeOwned>(
    id: FramerId,
    mut reader: OwnedReadHalf,
    codec: WireCodec,
    events: FramerEventSender<M>,
    shutdown: Arc<Shutdown>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_SIZE];

    'read: loop {
        let read = tokio::select! {
            _ = shutdown.stop_reader.notified() => break,
            read = reader.read(&mut chunk) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("Connection {} reached end of stream", id);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Read error on {}: {}", id, e);
                break;
            }
        };

        debug!("Received data of {} bytes on {}", n, id);
        decoder.push(&chunk[..n]);

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => match codec.decode::<M>(&frame) {
                    Ok(message) => {
                        if events.send((id, FramerEvent::MessageParsed(message))).is_err() {
                            break 'read;
                        }
                    }
                    Err(e) => {
                        error!("Undecodable {} payload on {}: {}", codec, id, e);
                        break 'read;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Protocol error on {}: {}", id, e);
                    break 'read;
                }
            }
        }
    }

    shutdown.begin();
    debug!("Connection {} closed", id);
    let _ = events.send((id, FramerEvent::Closed));
}

async fn write_loop(
    id: FramerId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    shutdown: Arc<Shutdown>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.stop_writer.notified() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = writer.write_all(&frame).await {
            error!("Error writing message of length {} on {}: {}", frame.len(), id, e);
            shutdown.begin();
            break;
        }
        debug!("Sent {} bytes on {}", frame.len(), id);
    }

    let _ = writer.shutdown().await;
}
