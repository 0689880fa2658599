// src/server/runtime.rs

//! The runtime object shared by the server and client launchers.

use super::event_loop::{self, EventLoop};
use super::handshake;
use super::inbound::InboundRouter;
use crate::config::Config;
use crate::connection::{
    Client, ClientId, ClientList, Connection, ConnectionContext, ConnectionKey, ConnectionOptions,
};
use crate::core::NetError;
use crate::core::handler::{CommunicationDispatcher, CommunicationRegistration};
use crate::core::protocol::{AdapterChain, FrameCodec, FramingKind, MessageCodec, MessageTypes};
use crate::core::rmi::{
    RemoteAccessRequest, RemoteAccessResponse, RemoteObjectFactory, RemoteObjectRegistration,
};
use anyhow::Result;
use std::net::TcpStream;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Owns everything one endpoint needs to exchange typed messages: the handler
/// registration, the codec, the remote-object registry, the known clients and the
/// event loop servicing the sockets.
pub struct NetworkRuntime {
    config: Config,
    registration: Arc<CommunicationRegistration>,
    adapters: Arc<AdapterChain>,
    codec: MessageCodec,
    remote_objects: Arc<RemoteObjectRegistration>,
    clients: Arc<ClientList>,
    event_loop: Arc<dyn EventLoop>,
    connection_options: ConnectionOptions,
}

impl NetworkRuntime {
    /// Validates `config` and builds a runtime with the remote-invocation pipelines
    /// and the server side of the handshake installed.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate()?;

        let dispatcher = CommunicationDispatcher::from_mode(
            config.dispatcher.mode,
            config.dispatcher.worker_threads,
        )?;
        let types = Arc::new(MessageTypes::new());
        let registration = Arc::new(CommunicationRegistration::new(
            dispatcher,
            types.clone(),
            config.pipeline.acquire_timeout,
        ));
        let adapters = Arc::new(AdapterChain::new());
        let codec = MessageCodec::new(adapters.clone(), types);

        let frame_codec = match config.framing.kind {
            FramingKind::LengthPrefixed => {
                FrameCodec::length_prefixed(config.framing.max_frame_length)
            }
            FramingKind::Delimited => {
                FrameCodec::delimited(config.framing.delimiter, config.framing.max_frame_length)
            }
        };
        let connection_options = ConnectionOptions {
            codec: frame_codec,
            read_buffer_size: config.io.read_buffer_size,
            read_timeout: Some(config.io.poll_interval),
        };
        let event_loop = event_loop::create(config.event_loop, config.io.poll_interval);

        let runtime = Arc::new(Self {
            config,
            registration,
            adapters,
            codec,
            remote_objects: Arc::new(RemoteObjectRegistration::new()),
            clients: Arc::new(ClientList::new()),
            event_loop,
            connection_options,
        });
        runtime.install_remote_access();
        handshake::install_server(&runtime);
        Ok(runtime)
    }

    fn install_remote_access(&self) {
        let objects = self.remote_objects.clone();
        self.registration
            .register::<RemoteAccessRequest>()
            .add_last(move |context, _session, request| {
                let response = objects.handle(request);
                context.send(&response)?;
                Ok(())
            });

        self.registration
            .register::<RemoteAccessResponse>()
            .add_last(|context, _session, response| {
                context.remote_blocks().respond(response.clone());
                Ok(())
            });
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registration(&self) -> &Arc<CommunicationRegistration> {
        &self.registration
    }

    pub fn adapters(&self) -> &Arc<AdapterChain> {
        &self.adapters
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn remote_objects(&self) -> &Arc<RemoteObjectRegistration> {
        &self.remote_objects
    }

    pub fn clients(&self) -> &Arc<ClientList> {
        &self.clients
    }

    pub fn event_loop(&self) -> &Arc<dyn EventLoop> {
        &self.event_loop
    }

    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.connection_options
    }

    /// Wraps a connected stream in the connection flavour the event loop services.
    pub fn wrap_stream(&self, stream: TcpStream) -> Result<Arc<Connection>, NetError> {
        match self.event_loop.kind() {
            event_loop::EventLoopKind::Blocking => {
                Connection::tcp(stream, &self.connection_options)
            }
            event_loop::EventLoopKind::Multiplexed => {
                Connection::multiplexed(stream, &self.connection_options)
            }
        }
    }

    /// Creates the context binding `connection` to `client` under `key` and routes
    /// the connection's frames through the registration.
    ///
    /// Closing a client's default connection disconnects the whole client; closing
    /// any other connection only kills its own context.
    pub fn attach(
        &self,
        client: &Arc<Client>,
        connection: Arc<Connection>,
        key: ConnectionKey,
    ) -> Arc<ConnectionContext> {
        let context = ConnectionContext::new(client, connection.clone(), key, self.codec.clone());
        connection.set_listener(Arc::new(InboundRouter::new(
            &context,
            self.registration.clone(),
        )));

        let weak_context: Weak<ConnectionContext> = Arc::downgrade(&context);
        let clients = Arc::downgrade(&self.clients);
        connection.add_shutdown_hook(Arc::new(move |_: &Connection| {
            let Some(context) = weak_context.upgrade() else {
                return;
            };
            let Some(client) = context.client() else {
                context.kill();
                return;
            };
            let is_default = client
                .default_context()
                .is_some_and(|d| Arc::ptr_eq(&d, &context));
            match clients.upgrade() {
                Some(clients) if is_default => clients.client_disconnected(&client),
                _ => context.kill(),
            }
        }));
        context
    }

    /// Takes ownership of a freshly accepted stream: mints a client for it, sends
    /// the client its id, and hands the connection to the event loop.
    pub fn accept(&self, stream: TcpStream) -> Result<Arc<ConnectionContext>, NetError> {
        let connection = self.wrap_stream(stream)?;
        let client = Client::new();
        let id = ClientId::new_random();
        client.set_id(id);

        let context = self.attach(&client, connection.clone(), ConnectionKey::default());
        context.store(&self.clients)?;
        context.send(&handshake::ClientIdAssigned { client_id: id })?;
        self.event_loop.register(connection)?;
        debug!("Client {} connected", id);
        Ok(context)
    }

    pub fn remote_factory(&self, context: Arc<ConnectionContext>) -> RemoteObjectFactory {
        RemoteObjectFactory::new(context, self.config.rmi.call_timeout)
    }

    /// Disconnects every client, stops the event loop and the dispatcher.
    pub fn shutdown(&self) {
        info!("Shutting down network runtime...");
        for client in self.clients.snapshot() {
            self.clients.client_disconnected(&client);
        }
        self.event_loop.shutdown();
        self.registration.dispatcher().shutdown();
        if !self.clients.is_empty() {
            warn!("{} clients remained after shutdown", self.clients.len());
        }
        self.clients.clear();
        info!("Network runtime stopped.");
    }
}
