use bytes::Bytes;
use commlink::connection::{Connection, ConnectionOptions, ConnectionState, FrameListener};
use commlink::core::NetError;
use commlink::core::protocol::FrameCodec;
use commlink::server::event_loop::MultiplexedEventLoop;
use commlink::server::{EventLoop, EventLoopKind, create_event_loop};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);

fn event_loop(kind: EventLoopKind) -> Arc<dyn EventLoop> {
    create_event_loop(kind, POLL)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Returns a connection of the flavour `event_loop` services, plus the raw socket
/// on the other end.
fn connect(event_loop: &dyn EventLoop) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let (stream, _) = listener.accept().unwrap();

    let options = ConnectionOptions {
        codec: FrameCodec::delimited(b'\n', 1024),
        read_timeout: Some(POLL),
        ..ConnectionOptions::default()
    };
    let connection = match event_loop.kind() {
        EventLoopKind::Blocking => Connection::tcp(stream, &options),
        EventLoopKind::Multiplexed => Connection::multiplexed(stream, &options),
    }
    .unwrap();
    (connection, peer)
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Bytes>>);

impl Recorder {
    fn frames(&self) -> Vec<Bytes> {
        self.0.lock().clone()
    }
}

impl FrameListener for Recorder {
    fn frames_available(&self, connection: &Connection) {
        self.0.lock().extend(connection.drain());
    }
}

struct Exploding;

impl FrameListener for Exploding {
    fn frames_available(&self, connection: &Connection) {
        connection.drain();
        panic!("handler failed on connection {}", connection.id());
    }
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

fn workload_tracks_registrations(kind: EventLoopKind) {
    let event_loop = event_loop(kind);
    event_loop.start().unwrap();
    assert!(event_loop.is_running());
    assert_eq!(event_loop.workload(), 0);

    let (first, _first_peer) = connect(event_loop.as_ref());
    let (second, _second_peer) = connect(event_loop.as_ref());
    event_loop.register(first.clone()).unwrap();
    event_loop.register(second.clone()).unwrap();
    assert_eq!(event_loop.workload(), 2);

    assert!(event_loop.unregister(&first));
    assert!(!event_loop.unregister(&first));
    assert_eq!(event_loop.workload(), 1);
    event_loop.wakeup();
    assert_eq!(event_loop.workload(), 1);

    event_loop.shutdown();
    assert!(!event_loop.is_running());
    assert_eq!(event_loop.workload(), 0);
    assert_eq!(second.state(), ConnectionState::Closed);
    // Unregistered connections are no longer the loop's to close.
    assert_ne!(first.state(), ConnectionState::Closed);

    let (late, _late_peer) = connect(event_loop.as_ref());
    assert!(matches!(
        event_loop.register(late),
        Err(NetError::Unsupported(_))
    ));
}

#[test]
fn test_blocking_workload_tracks_registrations() {
    workload_tracks_registrations(EventLoopKind::Blocking);
}

#[test]
fn test_multiplexed_workload_tracks_registrations() {
    workload_tracks_registrations(EventLoopKind::Multiplexed);
}

fn reregistered_connection_keeps_serving(kind: EventLoopKind) {
    let event_loop = event_loop(kind);
    event_loop.start().unwrap();
    let (connection, mut peer) = connect(event_loop.as_ref());
    let mut peer_reader = BufReader::new(peer.try_clone().unwrap());
    let recorder = Arc::new(Recorder::default());
    connection.set_listener(recorder.clone());

    event_loop.register(connection.clone()).unwrap();
    peer.write_all(b"one\n").unwrap();
    assert!(eventually(|| recorder.frames().len() == 1));

    assert!(event_loop.unregister(&connection));
    assert!(connection.is_open());
    connection.write_str("queued").unwrap();

    event_loop.register(connection.clone()).unwrap();
    assert_eq!(event_loop.workload(), 1);
    peer.write_all(b"two\n").unwrap();
    assert!(eventually(|| recorder.frames().len() == 2));
    assert_eq!(
        recorder.frames(),
        vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
    );

    assert_eq!(read_line(&mut peer_reader), "queued\n");
    connection.write_str("reply").unwrap();
    assert_eq!(read_line(&mut peer_reader), "reply\n");
    assert!(connection.is_open());

    event_loop.shutdown();
}

#[test]
fn test_blocking_reregistered_connection_keeps_serving() {
    reregistered_connection_keeps_serving(EventLoopKind::Blocking);
}

#[test]
fn test_multiplexed_reregistered_connection_keeps_serving() {
    reregistered_connection_keeps_serving(EventLoopKind::Multiplexed);
}

fn panicking_handler_closes_only_its_connection(kind: EventLoopKind) {
    let event_loop = event_loop(kind);
    event_loop.start().unwrap();

    let (failing, mut failing_peer) = connect(event_loop.as_ref());
    failing.set_listener(Arc::new(Exploding));
    let (healthy, mut healthy_peer) = connect(event_loop.as_ref());
    let recorder = Arc::new(Recorder::default());
    healthy.set_listener(recorder.clone());
    event_loop.register(failing.clone()).unwrap();
    event_loop.register(healthy.clone()).unwrap();

    failing_peer.write_all(b"boom\n").unwrap();
    assert!(eventually(|| failing.state() == ConnectionState::Closed));
    assert!(eventually(|| event_loop.workload() == 1));

    healthy_peer.write_all(b"still here\n").unwrap();
    assert!(eventually(|| recorder.frames().len() == 1));
    assert_eq!(recorder.frames(), vec![Bytes::from_static(b"still here")]);
    assert!(healthy.is_open());
    assert!(event_loop.is_running());

    event_loop.shutdown();
}

#[test]
fn test_blocking_panicking_handler_closes_only_its_connection() {
    panicking_handler_closes_only_its_connection(EventLoopKind::Blocking);
}

#[test]
fn test_multiplexed_panicking_handler_closes_only_its_connection() {
    panicking_handler_closes_only_its_connection(EventLoopKind::Multiplexed);
}

fn shutdown_closes_every_managed_connection(kind: EventLoopKind) {
    let event_loop = event_loop(kind);
    event_loop.start().unwrap();
    let pairs: Vec<_> = (0..3).map(|_| connect(event_loop.as_ref())).collect();
    for (connection, _) in &pairs {
        event_loop.register(connection.clone()).unwrap();
    }
    assert_eq!(event_loop.workload(), 3);

    event_loop.shutdown();
    assert_eq!(event_loop.workload(), 0);
    for (connection, peer) in &pairs {
        assert_eq!(connection.state(), ConnectionState::Closed);
        let mut byte = [0u8; 1];
        assert_eq!((&*peer).read(&mut byte).unwrap(), 0);
    }
}

#[test]
fn test_blocking_shutdown_closes_every_managed_connection() {
    shutdown_closes_every_managed_connection(EventLoopKind::Blocking);
}

#[test]
fn test_multiplexed_shutdown_closes_every_managed_connection() {
    shutdown_closes_every_managed_connection(EventLoopKind::Multiplexed);
}

fn shutdown_now_stops_without_waiting(kind: EventLoopKind) {
    let event_loop = event_loop(kind);
    event_loop.start().unwrap();
    let (connection, _peer) = connect(event_loop.as_ref());
    event_loop.register(connection.clone()).unwrap();

    event_loop.shutdown_now();
    assert!(!event_loop.is_running());
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(event_loop.start().is_err());
}

#[test]
fn test_blocking_shutdown_now_stops_without_waiting() {
    shutdown_now_stops_without_waiting(EventLoopKind::Blocking);
}

#[test]
fn test_multiplexed_shutdown_now_stops_without_waiting() {
    shutdown_now_stops_without_waiting(EventLoopKind::Multiplexed);
}

fn connections_registered_before_start_are_served(kind: EventLoopKind) {
    let event_loop = event_loop(kind);
    let (connection, mut peer) = connect(event_loop.as_ref());
    let recorder = Arc::new(Recorder::default());
    connection.set_listener(recorder.clone());
    event_loop.register(connection).unwrap();
    peer.write_all(b"early\n").unwrap();

    event_loop.start().unwrap();
    assert!(eventually(|| recorder.frames().len() == 1));
    assert_eq!(recorder.frames(), vec![Bytes::from_static(b"early")]);
    event_loop.shutdown();
}

#[test]
fn test_blocking_connections_registered_before_start_are_served() {
    connections_registered_before_start_are_served(EventLoopKind::Blocking);
}

#[test]
fn test_multiplexed_connections_registered_before_start_are_served() {
    connections_registered_before_start_are_served(EventLoopKind::Multiplexed);
}

#[test]
fn test_multiplexed_wakeup_reaches_the_selector() {
    let event_loop = MultiplexedEventLoop::new();
    event_loop.start().unwrap();
    event_loop.wakeup();
    event_loop.wakeup();
    assert!(eventually(|| event_loop.wakeup_count() == 2));

    event_loop.shutdown();
    // A stopped loop ignores wakeups.
    event_loop.wakeup();
    assert_eq!(event_loop.wakeup_count(), 2);
}

#[test]
fn test_loops_reject_foreign_transports() {
    let blocking = event_loop(EventLoopKind::Blocking);
    let multiplexed = event_loop(EventLoopKind::Multiplexed);
    let (tcp, _tcp_peer) = connect(blocking.as_ref());
    let (selectable, _selectable_peer) = connect(multiplexed.as_ref());

    assert!(matches!(
        blocking.register(selectable),
        Err(NetError::Unsupported(_))
    ));
    assert!(matches!(
        multiplexed.register(tcp),
        Err(NetError::Unsupported(_))
    ));
    assert_eq!(blocking.workload(), 0);
    assert_eq!(multiplexed.workload(), 0);
}
