// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod logging;
pub mod server;

// Re-export
pub use crate::config::Config;
pub use crate::connection::{Client, ClientId, Connection, ConnectionContext, ConnectionKey, Session};
pub use crate::core::handler::{CommunicationRegistration, ReceivePipeline};
pub use crate::core::rmi::{RemoteError, RemoteObjectFactory, RemoteProxy};
pub use crate::core::NetError;
pub use crate::server::{ClientStart, NetworkRuntime, ServerStart};
