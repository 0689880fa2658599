// src/connection/transport.rs

//! The socket-level variants behind a `Connection`.

use super::Connection;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// Which transport a connection runs over.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// A blocking TCP socket, read by a dedicated thread.
    Tcp,
    /// A connected, blocking UDP socket, read by a dedicated thread.
    Udp,
    /// A non-blocking TCP socket driven by a readiness-selecting event loop.
    Multiplexed,
    /// An in-process pair; writes are delivered to the peer on the writing thread.
    Memory,
}

pub(crate) enum Transport {
    Tcp {
        reader: Mutex<TcpStream>,
        writer: Mutex<TcpStream>,
    },
    Udp {
        socket: UdpSocket,
    },
    Multiplexed(MultiplexedIo),
    Memory {
        peer: RwLock<Weak<Connection>>,
    },
}

impl Transport {
    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Transport::Tcp { .. } => TransportKind::Tcp,
            Transport::Udp { .. } => TransportKind::Udp,
            Transport::Multiplexed(_) => TransportKind::Multiplexed,
            Transport::Memory { .. } => TransportKind::Memory,
        }
    }
}

/// The I/O state of a multiplexed connection.
///
/// Until the event loop adopts it, the socket sits in `pending` and outbound frames
/// queue up in the channel. Once adopted, the loop owns the read side and drains
/// the channel whenever the socket is writable. The loop hands the receiver back
/// when it stops servicing the connection, so frames keep queueing until the next
/// registration claims it.
pub(crate) struct MultiplexedIo {
    pending: Mutex<Option<TcpStream>>,
    // A second handle on the socket so `shutdown` can reach it once the loop owns it.
    closer: Mutex<Option<TcpStream>>,
    stream: OnceLock<Arc<tokio::net::TcpStream>>,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    outbound_returned: Notify,
    cancel: CancellationToken,
}

impl MultiplexedIo {
    pub(crate) fn new(stream: TcpStream) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            closer: Mutex::new(stream.try_clone().ok()),
            pending: Mutex::new(Some(stream)),
            stream: OnceLock::new(),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            outbound_returned: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Hands the raw socket to the event loop. Returns `None` once adopted.
    pub(crate) fn take_pending(&self) -> Option<TcpStream> {
        self.pending.lock().take()
    }

    /// Waits until no other task services the outbound queue, then takes it.
    pub(crate) async fn claim_outbound(&self) -> mpsc::UnboundedReceiver<Bytes> {
        loop {
            let returned = self.outbound_returned.notified();
            if let Some(receiver) = self.outbound_rx.lock().take() {
                return receiver;
            }
            returned.await;
        }
    }

    pub(crate) fn return_outbound(&self, receiver: mpsc::UnboundedReceiver<Bytes>) {
        *self.outbound_rx.lock() = Some(receiver);
        self.outbound_returned.notify_one();
    }

    pub(crate) fn attach(&self, stream: Arc<tokio::net::TcpStream>) -> bool {
        self.stream.set(stream).is_ok()
    }

    pub(crate) fn stream(&self) -> Option<&Arc<tokio::net::TcpStream>> {
        self.stream.get()
    }

    pub(crate) fn queue(&self, frame: Bytes) -> bool {
        self.outbound_tx.send(frame).is_ok()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        // A socket that never reached the loop is simply dropped.
        self.pending.lock().take();
        if let Some(socket) = self.closer.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}
