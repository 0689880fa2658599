// tests/integration/tcp_test.rs

//! Typed messages over real sockets with both event loop variants: handshake,
//! request/reply, per-key connections, disconnects and worker-pool dispatch.

use super::test_helpers::{TestServer, test_config, wait_until};
use commlink::connection::{Client, ClientId, ConnectionKey};
use commlink::core::handler::DispatchMode;
use commlink::core::protocol::Envelope;
use commlink::server::{ClientStart, EventLoopKind, ServerStart};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Ping {
    seq: u32,
    text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Pong {
    seq: u32,
    text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Unknown {
    value: u8,
}

const TIMEOUT: Duration = Duration::from_secs(5);

fn echo_server(kind: EventLoopKind) -> TestServer {
    TestServer::launch(kind, |server| {
        server
            .registration()
            .register::<Ping>()
            .add_last(|context, _session, ping| {
                context.send(&Pong {
                    seq: ping.seq,
                    text: ping.text.to_uppercase(),
                })?;
                Ok(())
            });
    })
}

fn pong_receiver(client: &ClientStart) -> mpsc::Receiver<Pong> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    client
        .registration()
        .register::<Pong>()
        .add_last(move |_context, _session, pong| {
            tx.lock().send(pong.clone())?;
            Ok(())
        });
    rx
}

fn assert_round_trip(kind: EventLoopKind) {
    let server = echo_server(kind);
    let mut receivers = Vec::new();
    let client = server.connect(|client| receivers.push(pong_receiver(client)));
    let rx = receivers.pop().unwrap();

    for seq in 0..20 {
        client
            .send(&Ping {
                seq,
                text: format!("hello {seq}"),
            })
            .unwrap();
    }
    for seq in 0..20 {
        let pong = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(pong.seq, seq);
        assert_eq!(pong.text, format!("HELLO {seq}"));
    }
    client.disconnect();
}

#[test]
fn test_round_trip_with_blocking_loop() {
    assert_round_trip(EventLoopKind::Blocking);
}

#[test]
fn test_round_trip_with_multiplexed_loop() {
    assert_round_trip(EventLoopKind::Multiplexed);
}

#[test]
fn test_handshake_assigns_matching_client_id() {
    for kind in [EventLoopKind::Blocking, EventLoopKind::Multiplexed] {
        let server = echo_server(kind);
        let client = server.connect(|_| {});
        assert!(server.wait_for_clients(1));

        let id: ClientId = client.client().id().expect("client should have an id");
        assert!(server.server.clients().contains(&id));
        assert!(client.runtime().clients().contains(&id));
        client.disconnect();
    }
}

#[test]
fn test_multiple_clients_are_tracked_separately() {
    let server = echo_server(EventLoopKind::Multiplexed);
    let first = server.connect(|_| {});
    let second = server.connect(|_| {});
    assert!(server.wait_for_clients(2));
    assert_ne!(first.client().id(), second.client().id());

    first.disconnect();
    assert!(server.wait_for_clients(1));
    second.disconnect();
    assert!(server.wait_for_clients(0));
}

#[test]
fn test_disconnect_fires_server_callbacks() {
    let server = echo_server(EventLoopKind::Blocking);
    let disconnected = Arc::new(AtomicUsize::new(0));
    let counter = disconnected.clone();
    server
        .server
        .clients()
        .on_disconnect(Arc::new(move |_client: &Arc<Client>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    let client = server.connect(|_| {});
    assert!(server.wait_for_clients(1));
    client.disconnect();

    assert!(wait_until(TIMEOUT, || disconnected.load(Ordering::SeqCst) == 1));
    assert!(server.server.clients().is_empty());
}

#[test]
fn test_create_connection_binds_to_existing_client() {
    for kind in [EventLoopKind::Blocking, EventLoopKind::Multiplexed] {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let server = TestServer::launch(kind, |server| {
            server
                .registration()
                .register::<Ping>()
                .add_last(move |context, _session, ping| {
                    record
                        .lock()
                        .push((context.key().clone(), context.client_id(), ping.seq));
                    Ok(())
                });
        });
        let client = server.connect(|_| {});
        let id = client.client().id();

        let key = ConnectionKey::of::<Ping>();
        let context = client.create_connection(key.clone()).unwrap();
        assert_eq!(context.key(), &key);
        assert_eq!(context.connection().identifier(), Some(key.clone()));
        assert!(client.context(&key).is_some());

        // Pings now travel over the dedicated connection.
        client.send(&Ping { seq: 1, text: String::new() }).unwrap();
        assert!(wait_until(TIMEOUT, || !seen.lock().is_empty()));
        assert_eq!(seen.lock()[0], (key.clone(), id, 1));

        // The extra connection did not register a second client.
        assert!(server.wait_for_clients(1));
        let server_client = server.server.clients().get(&id.unwrap()).unwrap();
        assert!(wait_until(TIMEOUT, || server_client.context(&key).is_some()));

        assert!(client.create_connection(key).is_err());
        client.disconnect();
    }
}

#[test]
fn test_closing_keyed_connection_keeps_client() {
    let server = echo_server(EventLoopKind::Blocking);
    let client = server.connect(|_| {});
    let key = ConnectionKey::named("bulk");
    let context = client.create_connection(key.clone()).unwrap();
    let id = client.client().id().unwrap();
    let server_client = server.server.clients().get(&id).unwrap();
    assert!(wait_until(TIMEOUT, || server_client.context(&key).is_some()));

    context.kill();
    assert!(client.context(&key).is_none());
    assert!(wait_until(TIMEOUT, || server_client.context(&key).is_none()));
    assert!(server.server.clients().contains(&id));
    assert!(client.client().is_connected());
    client.disconnect();
}

#[test]
fn test_unregistered_type_reaches_default_handler() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let server = TestServer::launch(EventLoopKind::Multiplexed, |server| {
        server
            .registration()
            .add_default_context_handler(move |context, _session, value| {
                if let Some(envelope) = value.downcast_ref::<Envelope>() {
                    sink.lock().push((context.client_id(), envelope.clone()));
                }
                Ok(())
            });
    });
    let client = server.connect(|_| {});
    client.send(&Unknown { value: 9 }).unwrap();

    assert!(wait_until(TIMEOUT, || received.lock().len() == 1));
    let (id, envelope) = received.lock()[0].clone();
    assert_eq!(id, client.client().id());
    assert!(envelope.type_name.ends_with("Unknown"));
    assert_eq!(envelope.payload["value"], 9);
    client.disconnect();
}

#[test]
fn test_worker_pool_dispatch_over_tcp() {
    let mut config = test_config(EventLoopKind::Blocking);
    config.dispatcher.mode = DispatchMode::WorkerPool;
    config.dispatcher.worker_threads = 2;

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let mut server = ServerStart::new(config.clone()).unwrap();
    server
        .registration()
        .register::<Ping>()
        .add_last(move |_context, _session, _ping| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    server.launch().unwrap();

    config.port = server.local_addr().unwrap().port();
    let client = ClientStart::new(config).unwrap();
    client.launch().unwrap();
    for seq in 0..50 {
        client.send(&Ping { seq, text: "x".into() }).unwrap();
    }

    assert!(wait_until(TIMEOUT, || handled.load(Ordering::SeqCst) == 50));
    client.disconnect();
    server.shutdown();
}

#[test]
fn test_client_launch_fails_without_server() {
    let mut config = test_config(EventLoopKind::Blocking);
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    config.port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = ClientStart::new(config).unwrap();
    assert!(client.launch().is_err());
}
