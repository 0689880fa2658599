// src/server/mod.rs

//! Endpoints: the event loops that service sockets, the runtime tying a registration
//! to them, and the server and client launchers.

pub mod event_loop;
mod connector;
mod handshake;
mod inbound;
mod runtime;
mod start;

pub use connector::ClientStart;
pub use event_loop::{AcceptHandler, EventLoop, EventLoopKind, create as create_event_loop};
pub use handshake::{ClientIdAssigned, ConnectionKeyAccepted, ConnectionKeyRequest};
pub use runtime::NetworkRuntime;
pub use start::ServerStart;
