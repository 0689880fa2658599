// src/server/connector.rs

//! Connects to a server, completes the handshake and opens per-key connections.

use super::handshake::{self, ConnectionKeyRequest, HandshakeState};
use super::runtime::NetworkRuntime;
use crate::config::Config;
use crate::connection::{Client, ClientId, ConnectionContext, ConnectionKey};
use crate::core::NetError;
use crate::core::handler::CommunicationRegistration;
use crate::core::protocol::WireMessage;
use crate::core::rmi::{
    RemoteInterface, RemoteObjectFactory, RemoteObjectRegistration, RemoteProxy, ResponseSlot,
    WaitOutcome,
};
use anyhow::{Context, Result, anyhow};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::info;

pub struct ClientStart {
    runtime: Arc<NetworkRuntime>,
    client: Arc<Client>,
    handshake: Arc<HandshakeState>,
}

impl ClientStart {
    pub fn new(config: Config) -> Result<Self> {
        let runtime = NetworkRuntime::new(config)?;
        let handshake = Arc::new(HandshakeState::default());
        handshake::install_client(&runtime, &handshake);
        Ok(Self {
            runtime,
            client: Client::new(),
            handshake,
        })
    }

    fn connect(&self) -> Result<TcpStream> {
        let config = self.runtime.config();
        TcpStream::connect((config.host.as_str(), config.port))
            .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))
    }

    /// Opens the default connection and blocks until the server has assigned this
    /// client its id. Handlers should be registered before calling this.
    pub fn launch(&self) -> Result<ClientId> {
        if self.client.default_context().is_some() {
            return Err(anyhow!("client is already launched"));
        }
        let connection = self.runtime.wrap_stream(self.connect()?)?;
        let context = self
            .runtime
            .attach(&self.client, connection.clone(), ConnectionKey::default());
        self.client.bind(context);

        let event_loop = self.runtime.event_loop();
        event_loop.start()?;
        event_loop.register(connection)?;

        match self
            .handshake
            .id_assigned
            .wait(Some(self.runtime.config().handshake_timeout))
        {
            WaitOutcome::Ready(id) => {
                info!("Connected to server as client {}", id);
                Ok(id)
            }
            WaitOutcome::Closed => Err(NetError::ConnectionDisconnected.into()),
            WaitOutcome::TimedOut => {
                self.client.disconnect();
                Err(NetError::Timeout(format!(
                    "no client id assigned within {:?}",
                    self.runtime.config().handshake_timeout
                ))
                .into())
            }
        }
    }

    /// Opens an additional connection dedicated to `key` and waits until the server
    /// has bound it to this client.
    pub fn create_connection(&self, key: ConnectionKey) -> Result<Arc<ConnectionContext>> {
        let client_id = self
            .client
            .id()
            .ok_or_else(|| anyhow!("client has not completed the handshake"))?;
        if self.client.context(&key).is_some() {
            return Err(anyhow!("a connection for '{}' already exists", key));
        }

        let slot = Arc::new(ResponseSlot::new());
        self.handshake.pending_keys.insert(key.clone(), slot.clone());
        let result = self.open_keyed(client_id, key.clone(), &slot);
        self.handshake.pending_keys.remove(&key);
        result
    }

    fn open_keyed(
        &self,
        client_id: ClientId,
        key: ConnectionKey,
        slot: &ResponseSlot<()>,
    ) -> Result<Arc<ConnectionContext>> {
        let connection = self.runtime.wrap_stream(self.connect()?)?;
        let context = self
            .runtime
            .attach(&self.client, connection.clone(), key.clone());
        self.runtime.event_loop().register(connection)?;
        context.send(&ConnectionKeyRequest {
            client_id,
            key: key.clone(),
        })?;

        match slot.wait(Some(self.runtime.config().handshake_timeout)) {
            WaitOutcome::Ready(()) => {
                self.client.bind(context.clone());
                info!("Opened connection '{}'", key);
                Ok(context)
            }
            WaitOutcome::Closed => {
                context.kill();
                Err(NetError::ConnectionDisconnected.into())
            }
            WaitOutcome::TimedOut => {
                context.kill();
                Err(NetError::Timeout(format!("connection '{key}' was not accepted")).into())
            }
        }
    }

    pub fn registration(&self) -> &Arc<CommunicationRegistration> {
        self.runtime.registration()
    }

    pub fn remote_objects(&self) -> &Arc<RemoteObjectRegistration> {
        self.runtime.remote_objects()
    }

    pub fn runtime(&self) -> &Arc<NetworkRuntime> {
        &self.runtime
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn context(&self, key: &ConnectionKey) -> Option<Arc<ConnectionContext>> {
        self.client.context(key)
    }

    /// Sends `value` over the connection dedicated to its type if one exists, and
    /// over the default connection otherwise.
    pub fn send<T: WireMessage>(&self, value: &T) -> Result<(), NetError> {
        let context = self
            .client
            .context(&ConnectionKey::of::<T>())
            .or_else(|| self.client.default_context())
            .ok_or(NetError::ConnectionDisconnected)?;
        context.send(value)
    }

    /// A proxy for the server's `I` over the default connection.
    pub fn remote<I: RemoteInterface + ?Sized>(&self) -> Result<RemoteProxy<I>, NetError> {
        Ok(self.remote_factory()?.create::<I>())
    }

    pub fn remote_factory(&self) -> Result<RemoteObjectFactory, NetError> {
        let context = self
            .client
            .default_context()
            .ok_or(NetError::ConnectionDisconnected)?;
        Ok(self.runtime.remote_factory(context))
    }

    /// Closes every connection of this client and stops the event loop.
    pub fn disconnect(&self) {
        self.client.disconnect();
        self.runtime.shutdown();
    }
}
