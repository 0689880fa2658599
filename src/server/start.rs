// src/server/start.rs

//! Binds a listener and accepts clients into a `NetworkRuntime`.

use super::runtime::NetworkRuntime;
use crate::config::Config;
use crate::connection::ClientList;
use crate::core::handler::CommunicationRegistration;
use crate::core::rmi::RemoteObjectRegistration;
use anyhow::{Context, Result, anyhow};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Weak};
use tracing::{error, info};

pub struct ServerStart {
    runtime: Arc<NetworkRuntime>,
    local_addr: Option<SocketAddr>,
}

impl ServerStart {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            runtime: NetworkRuntime::new(config)?,
            local_addr: None,
        })
    }

    /// Binds `host:port`, starts the event loop and begins accepting clients.
    /// Handlers should be registered before calling this.
    pub fn launch(&mut self) -> Result<()> {
        if self.local_addr.is_some() {
            return Err(anyhow!("server is already launched"));
        }
        let config = self.runtime.config();
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
        let local_addr = listener.local_addr()?;

        let event_loop = self.runtime.event_loop();
        event_loop.start()?;

        let runtime: Weak<NetworkRuntime> = Arc::downgrade(&self.runtime);
        event_loop.listen(
            listener,
            Arc::new(move |stream, addr| {
                let Some(runtime) = runtime.upgrade() else {
                    return;
                };
                if let Err(e) = runtime.accept(stream) {
                    error!("Failed to accept client from {}: {}", addr, e);
                }
            }),
        )?;

        info!(
            "Server listening on {} ({:?} event loop)",
            local_addr,
            event_loop.kind()
        );
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// The bound address, once launched. Useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registration(&self) -> &Arc<CommunicationRegistration> {
        self.runtime.registration()
    }

    pub fn remote_objects(&self) -> &Arc<RemoteObjectRegistration> {
        self.runtime.remote_objects()
    }

    pub fn clients(&self) -> &Arc<ClientList> {
        self.runtime.clients()
    }

    pub fn runtime(&self) -> &Arc<NetworkRuntime> {
        &self.runtime
    }

    pub fn shutdown(&self) {
        self.runtime.shutdown();
    }
}
