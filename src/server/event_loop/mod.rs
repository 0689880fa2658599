// src/server/event_loop/mod.rs

//! The strategies that drive connections: one reader thread per connection, or one
//! selector thread multiplexing many.

mod blocking;
mod multiplexed;

pub use blocking::BlockingEventLoop;
pub use multiplexed::MultiplexedEventLoop;

use crate::connection::Connection;
use crate::core::NetError;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Called with every stream a listener accepts. The stream is in blocking mode.
pub type AcceptHandler = Arc<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventLoopKind {
    #[default]
    Blocking,
    Multiplexed,
}

/// Drives the reads of registered connections.
///
/// An error or panic while servicing one connection closes that connection only;
/// the loop keeps serving the others.
pub trait EventLoop: Send + Sync {
    fn kind(&self) -> EventLoopKind;

    /// Starts servicing `connection`. Connections registered before `start` are
    /// picked up when the loop starts.
    fn register(&self, connection: Arc<Connection>) -> Result<(), NetError>;

    /// Stops servicing `connection` without closing it.
    fn unregister(&self, connection: &Connection) -> bool;

    fn start(&self) -> Result<(), NetError>;

    /// Closes every managed connection and waits for the loop threads to exit.
    fn shutdown(&self);

    /// Closes every managed connection and returns without waiting.
    fn shutdown_now(&self);

    fn is_running(&self) -> bool;

    /// Number of managed connections.
    fn workload(&self) -> usize;

    /// Interrupts a wait in the readiness selection so pending changes are observed.
    fn wakeup(&self);

    /// Accepts connections from `listener` on the loop's threads.
    fn listen(&self, listener: TcpListener, on_accept: AcceptHandler) -> Result<(), NetError>;
}

/// Builds the loop selected by configuration.
pub fn create(kind: EventLoopKind, poll_interval: Duration) -> Arc<dyn EventLoop> {
    match kind {
        EventLoopKind::Blocking => Arc::new(BlockingEventLoop::new(poll_interval)),
        EventLoopKind::Multiplexed => Arc::new(MultiplexedEventLoop::new()),
    }
}

/// Reads once from `connection`, turning a panic in the read path (which includes
/// the handlers it triggers) into a closed connection.
pub(crate) fn service_read(connection: &Connection) -> Result<usize, NetError> {
    match catch_unwind(AssertUnwindSafe(|| connection.read())) {
        Ok(result) => result,
        Err(_) => {
            error!(
                "Panic while servicing connection {}; closing it",
                connection.id()
            );
            connection.close();
            Err(NetError::Internal("panic while servicing connection".to_string()))
        }
    }
}
