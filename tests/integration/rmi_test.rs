// tests/integration/rmi_test.rs

//! Remote method invocation end to end: results, failures, exemptions, fallbacks,
//! timeouts, and release of blocked callers.

use super::test_helpers::{MemoryLink, TestServer};
use commlink::core::rmi::{RemoteError, RemoteFailureKind};
use commlink::remote_interface;
use commlink::server::EventLoopKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

remote_interface! {
    pub trait Greeter {
        fn greet(&self, name: String) -> String;
        fn add(&self, a: i64, b: i64) -> i64;
        fn fail(&self, reason: String) -> u32;
        fn notify(&self, event: String) -> ();
        fn pause(&self, millis: u64) -> u64;
    }
}

struct LocalGreeter {
    notified: AtomicUsize,
}

impl LocalGreeter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            notified: AtomicUsize::new(0),
        })
    }
}

impl Greeter for LocalGreeter {
    fn greet(&self, name: String) -> Result<String, RemoteError> {
        Ok(format!("echo:{name}"))
    }

    fn add(&self, a: i64, b: i64) -> Result<i64, RemoteError> {
        Ok(a + b)
    }

    fn fail(&self, reason: String) -> Result<u32, RemoteError> {
        Err(RemoteError::application("IllegalState", reason))
    }

    fn notify(&self, _event: String) -> Result<(), RemoteError> {
        self.notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self, millis: u64) -> Result<u64, RemoteError> {
        thread::sleep(Duration::from_millis(millis));
        Ok(millis)
    }
}

/// Answers locally when the remote side cannot.
struct FallbackGreeter;

impl Greeter for FallbackGreeter {
    fn greet(&self, name: String) -> Result<String, RemoteError> {
        Ok(format!("fallback:{name}"))
    }

    fn add(&self, _a: i64, _b: i64) -> Result<i64, RemoteError> {
        Ok(-1)
    }

    fn fail(&self, _reason: String) -> Result<u32, RemoteError> {
        Ok(7)
    }

    fn notify(&self, _event: String) -> Result<(), RemoteError> {
        Ok(())
    }

    fn pause(&self, _millis: u64) -> Result<u64, RemoteError> {
        Ok(0)
    }
}

fn expose(link: &MemoryLink) -> Arc<LocalGreeter> {
    let greeter = LocalGreeter::new();
    let object: Arc<dyn Greeter> = greeter.clone();
    link.server.remote_objects().register::<dyn Greeter>(object);
    greeter
}

#[test]
fn test_remote_call_returns_remote_result() {
    let link = MemoryLink::new();
    expose(&link);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>();

    assert_eq!(proxy.greet("hi".to_string()).unwrap(), "echo:hi");
    assert_eq!(proxy.add(40, 2).unwrap(), 42);
    assert_eq!(link.client_context.remote_blocks().pending_count(), 0);
}

#[test]
fn test_unit_returning_method_runs_remotely() {
    let link = MemoryLink::new();
    let greeter = expose(&link);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>();

    proxy.notify("ping".to_string()).unwrap();
    proxy.notify("ping".to_string()).unwrap();
    assert_eq!(greeter.notified.load(Ordering::SeqCst), 2);
}

#[test]
fn test_remote_exception_is_wrapped_as_request_failed() {
    let link = MemoryLink::new();
    expose(&link);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>();

    match proxy.fail("boom".to_string()) {
        Err(RemoteError::RequestFailed(failure)) => {
            assert_eq!(
                failure.kind,
                RemoteFailureKind::Application("IllegalState".to_string())
            );
            assert!(failure.message.contains("boom"));
        }
        other => panic!("Expected RequestFailed, got {:?}", other),
    }
}

#[test]
fn test_exempted_failure_without_fallback_is_rethrown_as_is() {
    let link = MemoryLink::new();
    expose(&link);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>()
        .ignore_remote_failure(RemoteFailureKind::Application("IllegalState".to_string()));

    match proxy.fail("boom".to_string()) {
        Err(RemoteError::Exception(failure)) => {
            assert_eq!(
                failure.kind,
                RemoteFailureKind::Application("IllegalState".to_string())
            );
        }
        other => panic!("Expected Exception, got {:?}", other),
    }
}

#[test]
fn test_exempted_failure_with_fallback_uses_fallback() {
    let link = MemoryLink::new();
    expose(&link);
    let fallback: Arc<dyn Greeter> = Arc::new(FallbackGreeter);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create_with_fallback::<dyn Greeter>(fallback)
        .ignore_method_failure(
            "fail",
            RemoteFailureKind::Application("IllegalState".to_string()),
        );

    assert_eq!(proxy.fail("boom".to_string()).unwrap(), 7);
    // Successful calls never touch the fallback.
    assert_eq!(proxy.greet("hi".to_string()).unwrap(), "echo:hi");
}

#[test]
fn test_method_exemption_does_not_cover_other_kinds() {
    let link = MemoryLink::new();
    expose(&link);
    let fallback: Arc<dyn Greeter> = Arc::new(FallbackGreeter);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create_with_fallback::<dyn Greeter>(fallback)
        .ignore_method_failure("fail", RemoteFailureKind::InvalidArguments);

    assert!(matches!(
        proxy.fail("boom".to_string()),
        Err(RemoteError::RequestFailed(_))
    ));
}

#[test]
fn test_object_not_registered_without_fallback_fails() {
    let link = MemoryLink::new();
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>();

    match proxy.greet("hi".to_string()) {
        Err(RemoteError::ObjectNotRegistered(name)) => assert!(name.ends_with("Greeter")),
        other => panic!("Expected ObjectNotRegistered, got {:?}", other),
    }
}

#[test]
fn test_object_not_registered_uses_fallback_instance() {
    let link = MemoryLink::new();
    let fallback: Arc<dyn Greeter> = Arc::new(FallbackGreeter);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create_with_fallback::<dyn Greeter>(fallback);

    assert_eq!(proxy.greet("hi".to_string()).unwrap(), "fallback:hi");
}

#[test]
fn test_object_not_registered_runs_fallback_runnable() {
    let link = MemoryLink::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create_with_runnable::<dyn Greeter, _>(move || flag.store(true, Ordering::SeqCst));

    proxy.notify("ping".to_string()).unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_runnable_fallback_keeps_failure_for_valued_methods() {
    let link = MemoryLink::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create_with_runnable::<dyn Greeter, _>(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    match proxy.greet("hi".to_string()) {
        Err(RemoteError::ObjectNotRegistered(name)) => assert!(name.ends_with("Greeter")),
        other => panic!("Expected ObjectNotRegistered, got {:?}", other),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    proxy.notify("ping".to_string()).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unregistered_object_stops_answering() {
    let link = MemoryLink::new();
    expose(&link);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>();
    assert!(proxy.greet("a".to_string()).is_ok());

    assert!(link.server.remote_objects().unregister::<dyn Greeter>());
    assert!(matches!(
        proxy.greet("b".to_string()),
        Err(RemoteError::ObjectNotRegistered(_))
    ));
}

#[test]
fn test_call_on_killed_context_uses_fallback() {
    let link = MemoryLink::new();
    expose(&link);
    let fallback: Arc<dyn Greeter> = Arc::new(FallbackGreeter);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create_with_fallback::<dyn Greeter>(fallback);

    link.client_context.kill();
    assert_eq!(proxy.greet("hi".to_string()).unwrap(), "fallback:hi");
}

#[test]
fn test_call_on_killed_context_without_fallback_fails() {
    let link = MemoryLink::new();
    expose(&link);
    let proxy = link
        .client
        .remote_factory(link.client_context.clone())
        .create::<dyn Greeter>();

    link.client_context.kill();
    assert!(matches!(
        proxy.greet("hi".to_string()),
        Err(RemoteError::ConnectionClosed) | Err(RemoteError::SendFailed(_))
    ));
}

#[test]
fn test_remote_call_over_blocking_tcp() {
    let server = TestServer::launch(EventLoopKind::Blocking, |server| {
        let object: Arc<dyn Greeter> = LocalGreeter::new();
        server.remote_objects().register::<dyn Greeter>(object);
    });
    let client = server.connect(|_| {});
    let proxy = client.remote::<dyn Greeter>().unwrap();

    assert_eq!(proxy.greet("hi".to_string()).unwrap(), "echo:hi");
    assert_eq!(proxy.add(1, 2).unwrap(), 3);
    client.disconnect();
}

#[test]
fn test_remote_call_over_multiplexed_tcp() {
    let server = TestServer::launch(EventLoopKind::Multiplexed, |server| {
        let object: Arc<dyn Greeter> = LocalGreeter::new();
        server.remote_objects().register::<dyn Greeter>(object);
    });
    let client = server.connect(|_| {});
    let proxy = client.remote::<dyn Greeter>().unwrap();

    for i in 0..10 {
        assert_eq!(proxy.greet(format!("{i}")).unwrap(), format!("echo:{i}"));
    }
    client.disconnect();
}

#[test]
fn test_concurrent_callers_get_their_own_responses() {
    let server = TestServer::launch(EventLoopKind::Blocking, |server| {
        let object: Arc<dyn Greeter> = LocalGreeter::new();
        server.remote_objects().register::<dyn Greeter>(object);
    });
    let client = server.connect(|_| {});
    let factory = client.remote_factory().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let proxy = factory.create::<dyn Greeter>();
            thread::spawn(move || proxy.add(i, 1000).unwrap())
        })
        .collect();
    let mut results: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort();
    assert_eq!(results, (1000..1008).collect::<Vec<_>>());
    client.disconnect();
}

#[test]
fn test_call_times_out_and_releases_correlation_id() {
    let server = TestServer::launch(EventLoopKind::Blocking, |server| {
        let object: Arc<dyn Greeter> = LocalGreeter::new();
        server.remote_objects().register::<dyn Greeter>(object);
    });
    let client = server.connect(|_| {});
    let proxy = client
        .remote::<dyn Greeter>()
        .unwrap()
        .with_timeout(Some(Duration::from_millis(100)));

    let started = Instant::now();
    match proxy.pause(600) {
        Err(RemoteError::Timeout(limit)) => assert_eq!(limit, Duration::from_millis(100)),
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_millis(550));
    assert_eq!(proxy.context().remote_blocks().pending_count(), 0);
    client.disconnect();
}

#[test]
fn test_killing_context_releases_blocked_caller() {
    let server = TestServer::launch(EventLoopKind::Blocking, |server| {
        let object: Arc<dyn Greeter> = LocalGreeter::new();
        server.remote_objects().register::<dyn Greeter>(object);
    });
    let client = server.connect(|_| {});
    let proxy = client.remote::<dyn Greeter>().unwrap();
    let context = proxy.context().clone();

    let caller = thread::spawn(move || {
        let started = Instant::now();
        (proxy.pause(800), started.elapsed())
    });
    assert!(super::test_helpers::wait_until(Duration::from_secs(2), || {
        context.remote_blocks().pending_count() == 1
    }));
    context.kill();

    let (result, elapsed) = caller.join().unwrap();
    assert!(matches!(result, Err(RemoteError::ConnectionClosed)));
    assert!(elapsed < Duration::from_millis(750));
    client.disconnect();
}
