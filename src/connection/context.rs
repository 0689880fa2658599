// src/connection/context.rs

//! Defines `ConnectionContext`, the addressable peer handle, and the keys that
//! name a client's connections.

use super::client::{Client, ClientId, ClientList};
use super::session::Session;
use super::Connection;
use crate::core::NetError;
use crate::core::protocol::{MessageCodec, WireMessage};
use crate::core::rmi::RemoteAccessBlockRegistration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

const DEFAULT_KEY: &str = "default";

/// Names one of a client's connections. Every client has a default connection;
/// further connections are dedicated to a message type or a chosen name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The key of a connection dedicated to messages of type `T`.
    pub fn of<T: WireMessage>() -> Self {
        Self(T::wire_name().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_KEY
    }
}

impl Default for ConnectionKey {
    fn default() -> Self {
        Self(DEFAULT_KEY.to_string())
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binds one `Connection` to its `Client` and `Session`.
///
/// A context owns the correlation table for remote calls issued over it; closing
/// the connection or killing the context releases every pending call.
pub struct ConnectionContext {
    client: Weak<Client>,
    session: Arc<Session>,
    connection: Arc<Connection>,
    key: ConnectionKey,
    codec: MessageCodec,
    remote_blocks: Arc<RemoteAccessBlockRegistration>,
    killed: AtomicBool,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("client_id", &self.client_id())
            .field("key", &self.key)
            .field("connection", &self.connection)
            .finish()
    }
}

impl ConnectionContext {
    pub fn new(
        client: &Arc<Client>,
        connection: Arc<Connection>,
        key: ConnectionKey,
        codec: MessageCodec,
    ) -> Arc<Self> {
        let remote_blocks = Arc::new(RemoteAccessBlockRegistration::new());
        let blocks = remote_blocks.clone();
        connection.add_shutdown_hook(Arc::new(move |_: &Connection| blocks.fail_all()));
        connection.set_identifier(key.clone());

        Arc::new(Self {
            client: Arc::downgrade(client),
            session: client.session().clone(),
            connection,
            key,
            codec,
            remote_blocks,
            killed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.upgrade()
    }

    /// The id of the owning client, once the handshake assigned one.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client().and_then(|c| c.id())
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn remote_blocks(&self) -> &Arc<RemoteAccessBlockRegistration> {
        &self.remote_blocks
    }

    pub fn is_alive(&self) -> bool {
        !self.killed.load(Ordering::Acquire) && self.connection.is_open()
    }

    /// Encodes `value` and writes it to this context's connection.
    pub fn send<T: WireMessage>(&self, value: &T) -> Result<(), NetError> {
        if self.killed.load(Ordering::Acquire) {
            return Err(NetError::SendFailed(format!(
                "context for '{}' has been killed",
                self.key
            )));
        }
        let payload = self.codec.encode(value)?;
        self.connection.write(payload)
    }

    /// Binds this context into its client under its key and makes the client
    /// reachable by id through `clients`.
    pub fn store(self: &Arc<Self>, clients: &ClientList) -> Result<(), NetError> {
        let client = self
            .client()
            .ok_or_else(|| NetError::Internal("context outlived its client".to_string()))?;
        client.bind(self.clone());
        clients.store(client)
    }

    /// Closes the connection, fails every pending remote call and detaches the
    /// context from its client. Further sends fail.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(
            "Killing context '{}' on connection {}",
            self.key,
            self.connection.id()
        );
        self.connection.close();
        self.remote_blocks.fail_all();
        if let Some(client) = self.client() {
            client.unbind_if(&self.key, self);
        }
    }
}
