// src/connection/mod.rs

//! One transport endpoint, its framing state, and the peer handles built on top of it.

mod buffer;
mod client;
mod context;
mod hooks;
mod session;
mod transport;

pub use buffer::ConnectionBuffer;
pub use client::{Client, ClientId, ClientList, DisconnectHandler};
pub use context::{ConnectionContext, ConnectionKey};
pub use hooks::ShutdownHook;
pub use session::Session;
pub use transport::TransportKind;

pub(crate) use transport::MultiplexedIo;

use crate::core::metrics;
use crate::core::protocol::FrameCodec;
use crate::core::NetError;
use bytes::{Bytes, BytesMut};
use hooks::ShutdownHooks;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};
use transport::Transport;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

/// Notified whenever new complete frames are queued on a connection.
pub trait FrameListener: Send + Sync {
    fn frames_available(&self, connection: &Connection);
}

/// Per-connection I/O settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub codec: FrameCodec,
    /// Size of the scratch buffer for a single read call.
    pub read_buffer_size: usize,
    /// Upper bound on one blocking read, so reader threads notice shutdown.
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            codec: FrameCodec::default(),
            read_buffer_size: 8 * 1024,
            read_timeout: Some(Duration::from_millis(100)),
        }
    }
}

/// Carry-over state for frame extraction: bytes of a frame that is not yet complete.
struct Framer {
    codec: FrameCodec,
    pending: BytesMut,
}

/// One socket-level endpoint.
pub struct Connection {
    id: ConnectionId,
    transport: Transport,
    state: AtomicU8,
    identifier: RwLock<Option<ConnectionKey>>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    buffer: ConnectionBuffer,
    framer: Mutex<Framer>,
    codec: FrameCodec,
    inbox: Mutex<VecDeque<Bytes>>,
    hooks: ShutdownHooks,
    listener: RwLock<Option<Arc<dyn FrameListener>>>,
    read_buffer_size: usize,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

impl Connection {
    fn build(
        transport: Transport,
        state: ConnectionState,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
        options: &ConnectionOptions,
    ) -> Self {
        if state == ConnectionState::Open {
            metrics::OPEN_CONNECTIONS.inc();
            metrics::CONNECTIONS_OPENED_TOTAL.inc();
        }
        Self {
            id: ConnectionId::next(),
            transport,
            state: AtomicU8::new(state as u8),
            identifier: RwLock::new(None),
            local_addr,
            remote_addr,
            buffer: ConnectionBuffer::with_capacity(options.read_buffer_size),
            framer: Mutex::new(Framer {
                codec: options.codec.clone(),
                pending: BytesMut::new(),
            }),
            codec: options.codec.clone(),
            inbox: Mutex::new(VecDeque::new()),
            hooks: ShutdownHooks::new(),
            listener: RwLock::new(None),
            read_buffer_size: options.read_buffer_size.max(1),
        }
    }

    /// Wraps a connected, blocking TCP stream.
    pub fn tcp(stream: TcpStream, options: &ConnectionOptions) -> Result<Arc<Self>, NetError> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(options.read_timeout)?;
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        let reader = stream.try_clone()?;
        let transport = Transport::Tcp {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
        };
        Ok(Arc::new(Self::build(
            transport,
            ConnectionState::Open,
            local_addr,
            remote_addr,
            options,
        )))
    }

    /// Wraps a UDP socket that has already been `connect`ed to its peer. Every
    /// datagram carries whole frames.
    pub fn udp(socket: UdpSocket, options: &ConnectionOptions) -> Result<Arc<Self>, NetError> {
        let remote_addr = Some(socket.peer_addr()?);
        let local_addr = socket.local_addr().ok();
        socket.set_read_timeout(options.read_timeout)?;
        Ok(Arc::new(Self::build(
            Transport::Udp { socket },
            ConnectionState::Open,
            local_addr,
            remote_addr,
            options,
        )))
    }

    /// Wraps a TCP stream that a multiplexed event loop will adopt. The connection
    /// stays `Connecting` until the loop opens it; writes issued before then are queued.
    pub fn multiplexed(
        stream: TcpStream,
        options: &ConnectionOptions,
    ) -> Result<Arc<Self>, NetError> {
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr().ok();
        let remote_addr = stream.peer_addr().ok();
        Ok(Arc::new(Self::build(
            Transport::Multiplexed(MultiplexedIo::new(stream)),
            ConnectionState::Connecting,
            local_addr,
            remote_addr,
            options,
        )))
    }

    /// Creates two in-process connections wired to each other.
    pub fn pair(options: &ConnectionOptions) -> (Arc<Self>, Arc<Self>) {
        let left = Arc::new(Self::build(
            Transport::Memory {
                peer: RwLock::new(Weak::new()),
            },
            ConnectionState::Open,
            None,
            None,
            options,
        ));
        let right = Arc::new(Self::build(
            Transport::Memory {
                peer: RwLock::new(Arc::downgrade(&left)),
            },
            ConnectionState::Open,
            None,
            None,
            options,
        ));
        if let Transport::Memory { peer } = &left.transport {
            *peer.write() = Arc::downgrade(&right);
        }
        (left, right)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The logical key this physical connection is dedicated to, if any.
    pub fn identifier(&self) -> Option<ConnectionKey> {
        self.identifier.read().clone()
    }

    pub fn set_identifier(&self, key: ConnectionKey) {
        *self.identifier.write() = Some(key);
    }

    pub fn buffer(&self) -> &ConnectionBuffer {
        &self.buffer
    }

    pub(crate) fn multiplexed_io(&self) -> Option<&MultiplexedIo> {
        match &self.transport {
            Transport::Multiplexed(io) => Some(io),
            _ => None,
        }
    }

    /// Moves a `Connecting` connection to `Open`. Fails on a closed connection.
    pub fn open(&self) -> Result<(), NetError> {
        match self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                metrics::OPEN_CONNECTIONS.inc();
                metrics::CONNECTIONS_OPENED_TOTAL.inc();
                debug!("Connection {} opened", self.id);
                Ok(())
            }
            Err(current) if current == ConnectionState::Open as u8 => Ok(()),
            Err(_) => Err(NetError::ConnectionDisconnected),
        }
    }

    /// Closes the socket and runs every shutdown hook once, in registration order.
    /// Calling `close` again is a no-op.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return;
        }
        if previous == ConnectionState::Open as u8 {
            metrics::OPEN_CONNECTIONS.dec();
        }
        debug!("Closing connection {} ({:?})", self.id, self.kind());

        match &self.transport {
            Transport::Tcp { writer, .. } => {
                let _ = writer.lock().shutdown(Shutdown::Both);
            }
            Transport::Udp { .. } => {}
            Transport::Multiplexed(io) => io.shutdown(),
            Transport::Memory { peer } => {
                let peer = peer.read().upgrade();
                if let Some(peer) = peer {
                    peer.close();
                }
            }
        }

        self.listener.write().take();
        self.hooks.fire(self);
    }

    /// Registers a callback for close time. Registering the same hook twice has no effect.
    pub fn add_shutdown_hook(&self, hook: ShutdownHook) -> bool {
        self.hooks.add(hook)
    }

    pub fn remove_shutdown_hook(&self, hook: &ShutdownHook) -> bool {
        self.hooks.remove(hook)
    }

    pub fn shutdown_hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn set_listener(&self, listener: Arc<dyn FrameListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Frames `payload` and sends it.
    pub fn write(&self, payload: Bytes) -> Result<(), NetError> {
        if !self.is_writable() {
            return Err(NetError::SendFailed(format!(
                "connection {} is closed",
                self.id
            )));
        }
        let frame = self.codec.clone().encode_to_bytes(payload)?;

        let result = match &self.transport {
            Transport::Tcp { writer, .. } => {
                let mut stream = writer.lock();
                stream.write_all(&frame).and_then(|_| stream.flush())
            }
            Transport::Udp { socket } => socket.send(&frame).map(|_| ()),
            Transport::Multiplexed(io) => {
                return if io.queue(frame) {
                    Ok(())
                } else {
                    Err(NetError::SendFailed(format!(
                        "event loop for connection {} is gone",
                        self.id
                    )))
                };
            }
            Transport::Memory { peer } => {
                let peer = peer.read().upgrade();
                return match peer {
                    Some(peer) if peer.is_open() => peer.receive(&frame).map(|_| ()),
                    _ => Err(NetError::SendFailed(format!(
                        "peer of connection {} is gone",
                        self.id
                    ))),
                };
            }
        };

        result.map_err(|e| {
            let error = NetError::from(e);
            if error.is_disconnect() {
                self.close();
            }
            NetError::SendFailed(error.to_string())
        })
    }

    pub fn write_str(&self, payload: &str) -> Result<(), NetError> {
        self.write(Bytes::copy_from_slice(payload.as_bytes()))
    }

    fn is_writable(&self) -> bool {
        match self.state() {
            ConnectionState::Open => true,
            // Multiplexed writes queue until the loop adopts the socket.
            ConnectionState::Connecting => self.multiplexed_io().is_some(),
            ConnectionState::Closed => false,
        }
    }

    /// Pulls whatever bytes are available into the buffer and queues every complete
    /// frame. Returns the number of bytes read; `0` means nothing was available.
    ///
    /// End of stream and I/O errors close the connection.
    pub fn read(&self) -> Result<usize, NetError> {
        if self.state() == ConnectionState::Closed {
            return Err(NetError::ConnectionDisconnected);
        }
        let mut scratch = vec![0u8; self.read_buffer_size];

        let outcome = match &self.transport {
            Transport::Tcp { reader, .. } => match reader.lock().read(&mut scratch) {
                Ok(0) => Err(None),
                Ok(n) => Ok(n),
                Err(e) => Err(Some(e)),
            },
            Transport::Udp { socket } => socket.recv(&mut scratch).map_err(Some),
            Transport::Multiplexed(io) => match io.stream() {
                Some(stream) => match stream.try_read(&mut scratch) {
                    Ok(0) => Err(None),
                    Ok(n) => Ok(n),
                    Err(e) => Err(Some(e)),
                },
                None => Ok(0),
            },
            // Memory peers push frames on write.
            Transport::Memory { .. } => Ok(0),
        };

        match outcome {
            Ok(0) => Ok(0),
            Ok(n) => self.receive(&scratch[..n]).map(|_| n),
            Err(Some(e))
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(Some(e)) => {
                if self.is_open() {
                    warn!("Read error on connection {}: {}", self.id, e);
                }
                self.close();
                Err(NetError::from(e))
            }
            Err(None) => {
                debug!("Connection {} closed by peer.", self.id);
                self.close();
                Err(NetError::ConnectionDisconnected)
            }
        }
    }

    /// Accepts raw bytes from the transport: buffers them, extracts complete frames
    /// and notifies the listener. Returns the number of frames queued.
    pub fn receive(&self, chunk: &[u8]) -> Result<usize, NetError> {
        metrics::BYTES_RECEIVED_TOTAL.inc_by(chunk.len() as f64);
        self.buffer.append(chunk);
        let frames = match self.extract_frames() {
            Ok(frames) => frames,
            Err(e) => {
                // A stream that violates the framing policy cannot be resynchronised.
                warn!("Framing error on connection {}: {}", self.id, e);
                self.close();
                return Err(e);
            }
        };
        if frames > 0 {
            metrics::FRAMES_RECEIVED_TOTAL.inc_by(frames as f64);
            let listener = self.listener.read().clone();
            if let Some(listener) = listener {
                listener.frames_available(self);
            }
        }
        Ok(frames)
    }

    fn extract_frames(&self) -> Result<usize, NetError> {
        let mut framer = self.framer.lock();
        let taken = self.buffer.take();
        framer.pending.extend_from_slice(&taken);

        let Framer { codec, pending } = &mut *framer;
        let mut count = 0;
        while let Some(frame) = codec.decode(pending)? {
            self.inbox.lock().push_back(frame);
            count += 1;
        }
        Ok(count)
    }

    /// Atomically removes and returns every queued complete frame.
    pub fn drain(&self) -> Vec<Bytes> {
        self.inbox.lock().drain(..).collect()
    }

    pub fn pending_frames(&self) -> usize {
        self.inbox.lock().len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state() != ConnectionState::Closed {
            self.close();
        }
    }
}
