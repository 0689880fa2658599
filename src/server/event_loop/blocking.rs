// src/server/event_loop/blocking.rs

//! Thread-per-connection event loop.

use super::{AcceptHandler, EventLoop, EventLoopKind, service_read};
use crate::connection::{Connection, ConnectionId, TransportKind};
use crate::core::NetError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Worker {
    connection: Arc<Connection>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

struct Inner {
    workers: DashMap<ConnectionId, Worker>,
    acceptors: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    stopping: AtomicBool,
    poll_interval: Duration,
}

/// Runs one reader thread per registered connection. Each thread calls the
/// connection's blocking `read` until the connection closes or is unregistered.
pub struct BlockingEventLoop {
    inner: Arc<Inner>,
}

impl BlockingEventLoop {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                workers: DashMap::new(),
                acceptors: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                poll_interval,
            }),
        }
    }
}

impl Inner {
    fn spawn_reader(self: &Arc<Self>, id: ConnectionId) -> Result<(), NetError> {
        let Some(mut worker) = self.workers.get_mut(&id) else {
            return Ok(());
        };
        if worker.thread.is_some() {
            return Ok(());
        }
        let connection = worker.connection.clone();
        let stop = worker.stop.clone();
        let inner = self.clone();
        let handle = thread::Builder::new()
            .name(format!("commlink-reader-{}", id.as_u64()))
            .spawn(move || inner.read_until_closed(connection, stop))?;
        worker.thread = Some(handle);
        Ok(())
    }

    fn read_until_closed(&self, connection: Arc<Connection>, stop: Arc<AtomicBool>) {
        let id = connection.id();
        debug!("Reader thread started for connection {}", id);
        while !stop.load(Ordering::Acquire) && connection.is_open() {
            match service_read(&connection) {
                // Memory transports never block in `read`.
                Ok(0) if connection.kind() == TransportKind::Memory => {
                    thread::sleep(self.poll_interval)
                }
                Ok(_) => {}
                Err(e) => {
                    if !e.is_disconnect() {
                        warn!("Connection {} stopped: {}", id, e);
                    }
                    break;
                }
            }
        }
        // Only the thread's own registration is removed; a re-registration keeps its entry.
        self.workers
            .remove_if(&id, |_, w| Arc::ptr_eq(&w.stop, &stop));
        debug!("Reader thread for connection {} exited", id);
    }

    fn accept_until_stopped(&self, listener: TcpListener, on_accept: AcceptHandler) {
        let local = listener.local_addr().ok();
        info!("Accepting connections on {:?}", local);
        while !self.stopping.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!("Dropping connection from {}: {}", addr, e);
                        continue;
                    }
                    debug!("Accepted new connection from: {}", addr);
                    on_accept(stream, addr);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(self.poll_interval),
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    thread::sleep(self.poll_interval);
                }
            }
        }
        info!("Stopped accepting connections on {:?}", local);
    }

    fn stop_all(&self) -> Vec<JoinHandle<()>> {
        self.stopping.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        let mut handles = Vec::new();
        let ids: Vec<ConnectionId> = self.workers.iter().map(|w| *w.key()).collect();
        for id in ids {
            if let Some((_, mut worker)) = self.workers.remove(&id) {
                worker.stop.store(true, Ordering::Release);
                worker.connection.close();
                if let Some(handle) = worker.thread.take() {
                    handles.push(handle);
                }
            }
        }
        handles.extend(self.acceptors.lock().drain(..));
        handles
    }
}

impl EventLoop for BlockingEventLoop {
    fn kind(&self) -> EventLoopKind {
        EventLoopKind::Blocking
    }

    fn register(&self, connection: Arc<Connection>) -> Result<(), NetError> {
        if connection.kind() == TransportKind::Multiplexed {
            return Err(NetError::Unsupported(
                "multiplexed connections need a multiplexed event loop".to_string(),
            ));
        }
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(NetError::Unsupported("event loop is shut down".to_string()));
        }
        let id = connection.id();
        let previous = self.inner.workers.insert(
            id,
            Worker {
                connection,
                stop: Arc::new(AtomicBool::new(false)),
                thread: None,
            },
        );
        if let Some(previous) = previous {
            previous.stop.store(true, Ordering::Release);
        }
        if self.is_running() {
            self.inner.spawn_reader(id)?;
        }
        Ok(())
    }

    fn unregister(&self, connection: &Connection) -> bool {
        match self.inner.workers.remove(&connection.id()) {
            Some((_, worker)) => {
                worker.stop.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn start(&self) -> Result<(), NetError> {
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(NetError::Unsupported("event loop is shut down".to_string()));
        }
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let ids: Vec<ConnectionId> = self.inner.workers.iter().map(|w| *w.key()).collect();
        for id in ids {
            self.inner.spawn_reader(id)?;
        }
        info!("Blocking event loop started");
        Ok(())
    }

    fn shutdown(&self) {
        let handles = self.inner.stop_all();
        let current = thread::current().id();
        for handle in handles {
            // A loop thread shutting down its own loop cannot join itself.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        info!("Blocking event loop shut down");
    }

    fn shutdown_now(&self) {
        drop(self.inner.stop_all());
        info!("Blocking event loop stopped");
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn workload(&self) -> usize {
        self.inner.workers.len()
    }

    fn wakeup(&self) {
        // Reader threads observe changes at their next read timeout.
    }

    fn listen(&self, listener: TcpListener, on_accept: AcceptHandler) -> Result<(), NetError> {
        if !self.is_running() {
            return Err(NetError::Unsupported("event loop is not running".to_string()));
        }
        listener.set_nonblocking(true)?;
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("commlink-acceptor".to_string())
            .spawn(move || inner.accept_until_stopped(listener, on_accept))?;
        self.inner.acceptors.lock().push(handle);
        Ok(())
    }
}

impl Drop for BlockingEventLoop {
    fn drop(&mut self) {
        if !self.inner.stopping.load(Ordering::Acquire) {
            self.shutdown_now();
        }
    }
}
