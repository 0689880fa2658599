// src/server/event_loop/multiplexed.rs

//! Single-thread event loop multiplexing many sockets through readiness selection.
//!
//! The loop thread runs a current-thread tokio runtime. Each registered connection
//! gets a task that waits for read readiness, write readiness for queued frames,
//! or cancellation; the runtime's reactor is the selector all tasks share.

use super::{AcceptHandler, EventLoop, EventLoopKind, service_read};
use crate::connection::{Connection, ConnectionId};
use crate::core::NetError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

enum Command {
    Register(Arc<Connection>, CancellationToken),
    Listen(TcpListener, AcceptHandler),
    Wakeup,
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    connections: DashMap<ConnectionId, (Arc<Connection>, CancellationToken)>,
    thread: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    shutdown: CancellationToken,
    wakeups: AtomicU64,
}

pub struct MultiplexedEventLoop {
    inner: Arc<Inner>,
}

impl Default for MultiplexedEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiplexedEventLoop {
    pub fn new() -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                commands,
                receiver: Mutex::new(Some(receiver)),
                connections: DashMap::new(),
                thread: Mutex::new(None),
                running: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                wakeups: AtomicU64::new(0),
            }),
        }
    }

    /// How many wakeups the loop has processed.
    pub fn wakeup_count(&self) -> u64 {
        self.inner.wakeups.load(Ordering::Relaxed)
    }

    fn send(&self, command: Command) -> Result<(), NetError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(NetError::Unsupported("event loop is shut down".to_string()));
        }
        self.inner
            .commands
            .send(command)
            .map_err(|_| NetError::Internal("event loop command channel closed".to_string()))
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        self.inner.shutdown.cancel();
        self.inner.running.store(false, Ordering::Release);
        let ids: Vec<ConnectionId> = self.inner.connections.iter().map(|c| *c.key()).collect();
        for id in ids {
            if let Some((_, (connection, token))) = self.inner.connections.remove(&id) {
                token.cancel();
                connection.close();
            }
        }
        self.inner.thread.lock().take()
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<Command>) {
        info!("Multiplexed event loop started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                command = receiver.recv() => match command {
                    Some(Command::Register(connection, token)) => {
                        let inner = self.clone();
                        tokio::spawn(async move { inner.drive(connection, token).await });
                    }
                    Some(Command::Listen(listener, on_accept)) => {
                        let inner = self.clone();
                        tokio::spawn(async move { inner.accept(listener, on_accept).await });
                    }
                    Some(Command::Wakeup) => {
                        self.wakeups.fetch_add(1, Ordering::Relaxed);
                        trace!("Event loop woken up");
                    }
                    None => break,
                },
            }
        }
        info!("Multiplexed event loop stopped");
    }

    /// Services one connection until it closes, is unregistered, or the loop stops.
    async fn drive(self: Arc<Self>, connection: Arc<Connection>, token: CancellationToken) {
        let id = connection.id();
        if let Err(e) = self.serve(&connection, &token).await {
            if !e.is_disconnect() {
                warn!("Connection {} terminated: {}", id, e);
            }
            connection.close();
        }
        self.connections
            .remove_if(&id, |_, (_, t)| t.is_cancelled() || !connection.is_open());
        debug!("Stopped servicing connection {}", id);
    }

    async fn serve(&self, connection: &Connection, token: &CancellationToken) -> Result<(), NetError> {
        let io = connection
            .multiplexed_io()
            .ok_or_else(|| NetError::Unsupported("not a multiplexed connection".to_string()))?;
        let stream = match io.stream() {
            Some(stream) => stream.clone(),
            None => {
                let raw = io
                    .take_pending()
                    .ok_or(NetError::ConnectionDisconnected)?;
                raw.set_nonblocking(true)?;
                let stream = Arc::new(TcpStream::from_std(raw)?);
                io.attach(stream.clone());
                stream
            }
        };
        let closed = io.cancellation();
        // A previous registration may still be winding down; it returns the queue on exit.
        let mut outbound = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = closed.cancelled() => return Ok(()),
            receiver = io.claim_outbound() => receiver,
        };
        let result = match connection.open() {
            Ok(()) => pump(connection, &stream, &mut outbound, token, &closed).await,
            Err(e) => Err(e),
        };
        io.return_outbound(outbound);
        result
    }

    async fn accept(self: Arc<Self>, listener: TcpListener, on_accept: AcceptHandler) {
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| tokio::net::TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to adopt listener: {}", e);
                return;
            }
        };
        info!("Accepting connections on {:?}", listener.local_addr().ok());
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                res = listener.accept() => match res {
                    Ok((stream, addr)) => {
                        let stream = match stream.into_std().and_then(|s| {
                            s.set_nonblocking(false)?;
                            Ok(s)
                        }) {
                            Ok(stream) => stream,
                            Err(e) => {
                                warn!("Dropping connection from {}: {}", addr, e);
                                continue;
                            }
                        };
                        debug!("Accepted new connection from: {}", addr);
                        on_accept(stream, addr);
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }
    }
}

/// Reads and writes for one connection until it is cancelled or fails.
async fn pump(
    connection: &Connection,
    stream: &TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<Bytes>,
    token: &CancellationToken,
    closed: &CancellationToken,
) -> Result<(), NetError> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = closed.cancelled() => return Ok(()),

            ready = stream.readable() => {
                ready?;
                service_read(connection)?;
            }

            frame = outbound.recv() => match frame {
                Some(frame) => write_frame(stream, &frame).await?,
                None => return Ok(()),
            },
        }
    }
}

async fn write_frame(stream: &TcpStream, frame: &Bytes) -> io::Result<()> {
    let mut written = 0;
    while written < frame.len() {
        stream.writable().await?;
        match stream.try_write(&frame[written..]) {
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl EventLoop for MultiplexedEventLoop {
    fn kind(&self) -> EventLoopKind {
        EventLoopKind::Multiplexed
    }

    fn register(&self, connection: Arc<Connection>) -> Result<(), NetError> {
        if connection.multiplexed_io().is_none() {
            return Err(NetError::Unsupported(format!(
                "{:?} connections cannot be multiplexed",
                connection.kind()
            )));
        }
        let token = self.inner.shutdown.child_token();
        self.inner
            .connections
            .insert(connection.id(), (connection.clone(), token.clone()));
        self.send(Command::Register(connection, token))
    }

    fn unregister(&self, connection: &Connection) -> bool {
        match self.inner.connections.remove(&connection.id()) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn start(&self) -> Result<(), NetError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(NetError::Unsupported("event loop is shut down".to_string()));
        }
        let Some(receiver) = self.inner.receiver.lock().take() else {
            return Ok(());
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("commlink-selector".to_string())
            .spawn(move || runtime.block_on(inner.run(receiver)))?;
        *self.inner.thread.lock() = Some(handle);
        self.inner.running.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(handle) = self.stop() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn shutdown_now(&self) {
        drop(self.stop());
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn workload(&self) -> usize {
        self.inner.connections.len()
    }

    fn wakeup(&self) {
        let _ = self.send(Command::Wakeup);
    }

    fn listen(&self, listener: TcpListener, on_accept: AcceptHandler) -> Result<(), NetError> {
        self.send(Command::Listen(listener, on_accept))
    }
}

impl Drop for MultiplexedEventLoop {
    fn drop(&mut self) {
        if !self.inner.shutdown.is_cancelled() {
            self.shutdown_now();
        }
    }
}
