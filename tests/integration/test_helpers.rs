// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use commlink::config::Config;
use commlink::connection::{
    Client, Connection, ConnectionContext, ConnectionKey, ConnectionOptions,
};
use commlink::server::{ClientStart, EventLoopKind, NetworkRuntime, ServerStart};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A loopback configuration on an ephemeral port with short timeouts.
pub fn test_config(kind: EventLoopKind) -> Config {
    let mut config = Config::default();
    config.port = 0;
    config.event_loop = kind;
    config.io.poll_interval = Duration::from_millis(10);
    config.rmi.call_timeout = Some(Duration::from_secs(5));
    config.handshake_timeout = Duration::from_secs(5);
    config
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A launched server on an ephemeral loopback port.
pub struct TestServer {
    pub server: ServerStart,
    pub kind: EventLoopKind,
}

impl TestServer {
    /// Runs `setup` against the server before it starts accepting.
    pub fn launch(kind: EventLoopKind, setup: impl FnOnce(&ServerStart)) -> Self {
        init_tracing();
        let mut server =
            ServerStart::new(test_config(kind)).expect("Failed to build server");
        setup(&server);
        server.launch().expect("Failed to launch server");
        Self { server, kind }
    }

    pub fn port(&self) -> u16 {
        self.server
            .local_addr()
            .expect("server should be bound")
            .port()
    }

    pub fn client_config(&self) -> Config {
        let mut config = test_config(self.kind);
        config.port = self.port();
        config
    }

    /// Connects a client and waits for its id. `setup` runs before connecting.
    pub fn connect(&self, setup: impl FnOnce(&ClientStart)) -> ClientStart {
        let client = ClientStart::new(self.client_config()).expect("Failed to build client");
        setup(&client);
        client.launch().expect("Failed to launch client");
        client
    }

    /// Waits until the server has registered `count` clients.
    pub fn wait_for_clients(&self, count: usize) -> bool {
        wait_until(Duration::from_secs(5), || {
            self.server.clients().len() == count
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// Two runtimes joined by an in-process connection pair. Writes on one side are
/// handled synchronously on the writer's thread by the other side.
pub struct MemoryLink {
    pub server: Arc<NetworkRuntime>,
    pub client: Arc<NetworkRuntime>,
    pub server_client: Arc<Client>,
    pub client_client: Arc<Client>,
    pub server_context: Arc<ConnectionContext>,
    pub client_context: Arc<ConnectionContext>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::with_config(test_config(EventLoopKind::Blocking))
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let server = NetworkRuntime::new(config.clone()).expect("Failed to build runtime");
        let client = NetworkRuntime::new(config).expect("Failed to build runtime");
        let (left, right) = Connection::pair(&ConnectionOptions::default());

        let server_client = Client::new();
        let client_client = Client::new();
        let server_context = server.attach(&server_client, left, ConnectionKey::default());
        server_client.bind(server_context.clone());
        let client_context = client.attach(&client_client, right, ConnectionKey::default());
        client_client.bind(client_context.clone());

        Self {
            server,
            client,
            server_client,
            client_client,
            server_context,
            client_context,
        }
    }
}
