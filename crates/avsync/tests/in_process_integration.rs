//! Integration tests for a client wired in-process to a dummy server.
//!
//! # Purpose
//!
//! These tests drive a [`Client`] and a [`Server`] with a [`DummyBackend`]
//! through their public API, connected by an in-memory pipe instead of a
//! socket.  They verify:
//!
//! - Scheduling before anything is known polls the missing variables and runs
//!   the call exactly once when the dummy answers.
//! - Out-of-domain writes fail synchronously and send nothing.
//! - Lines no variable recognises land in the fallback variable only.
//! - Disconnecting unsets every variable and drops every pending call.
//! - A value arriving after a call's deadline does not run the call.
//! - A value the framing cannot carry is refused without dropping the link.
//!
//! # Wiring
//!
//! ```text
//! Client ──Endpoint::InProcess──► tokio::io::duplex ──attach──► Server
//!   (reactor thread)                                        (reactor thread)
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use avsync::{
    Client, ConnectionState, Domain, DummyBackend, Endpoint, Responder, Resolved, Scheme, Server,
    ServerBackend, SharedVariable, Target, TargetConfig, TargetError, TargetObserver, TargetUri,
    Value, FALLBACK_ID,
};
use avsync_core::{LineFormat, PrefixCodec, VariableDef};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `power` (boolean, default false) and `volume` (0..98, dummy 49).
fn demo_scheme() -> Arc<Scheme> {
    Scheme::builder("demo")
        .variable(
            VariableDef::builder("power", PrefixCodec::new("PW", LineFormat::flag("ON", "STANDBY")))
                .domain(Domain::Boolean)
                .default(false)
                .build()
                .expect("valid definition"),
        )
        .variable(
            VariableDef::builder("volume", PrefixCodec::new("MV", LineFormat::Digits { width: 2 }))
                .domain(Domain::Integer { min: 0, max: 98 })
                .dummy(49)
                .build()
                .expect("valid definition"),
        )
        .build()
        .expect("valid scheme")
}

fn fast_config() -> TargetConfig {
    TargetConfig {
        reconnect_interval: Duration::from_millis(100),
        idle_tick: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(1),
        poll_timeout: Duration::from_millis(500),
        get_timeout: Duration::from_secs(2),
        ..TargetConfig::default()
    }
}

/// An entered dummy server and a client pointing at it (not yet entered).
fn pair() -> (Arc<Server>, Client) {
    pair_with(Arc::new(DummyBackend), fast_config())
}

fn pair_with(backend: Arc<dyn ServerBackend>, client_config: TargetConfig) -> (Arc<Server>, Client) {
    init_logging();
    let scheme = demo_scheme();
    let server = Arc::new(Server::new(
        Arc::clone(&scheme),
        TargetUri::new("demo", Vec::<String>::new()),
        None,
        fast_config(),
        backend,
    ));
    server.enter().expect("server enters");
    let client = Client::new(
        scheme,
        TargetUri::new("demo", Vec::<String>::new()),
        Endpoint::InProcess(Arc::clone(&server)),
        client_config,
    );
    (server, client)
}

/// Answers polls with the dummy value after `delay`, from another thread.
struct SlowBackend {
    delay: Duration,
}

impl ServerBackend for SlowBackend {
    fn poll(&self, variable: &SharedVariable, responder: Responder) {
        let value = variable.def().dummy_value();
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = responder.set(value);
        });
    }

    fn write(&self, _variable: &SharedVariable, value: Value, responder: Responder) {
        let _ = responder.set(value);
    }
}

/// Routes `tracing` output to the test harness when `RUST_LOG` is set.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Records every `on_set` as `(variable, value)`.
#[derive(Default)]
struct Recorder {
    sets: Mutex<Vec<(String, Value)>>,
}

impl TargetObserver for Recorder {
    fn on_set(&self, variable: &SharedVariable, value: &Value) {
        self.sets
            .lock()
            .unwrap()
            .push((variable.id().to_string(), value.clone()));
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

/// A call scheduled before anything is known triggers polls for both
/// variables and runs once, with the dummy values, when both have arrived.
#[test]
fn test_schedule_before_connect_runs_once_with_dummy_values() {
    // Arrange
    let (_server, client) = pair();
    let (tx, rx) = mpsc::channel();

    // Act
    let call = client
        .schedule(&["power", "volume"], None, move |resolved: &Resolved| {
            tx.send((resolved.get("power").cloned(), resolved.get("volume").cloned()))
                .unwrap();
        })
        .expect("schedule");
    client.connect().expect("in-process connect");

    // Assert
    assert!(call.is_some(), "nothing was known yet");
    let (power, volume) = rx.recv_timeout(Duration::from_secs(2)).expect("call ran");
    assert_eq!(power, Some(Value::Bool(false)));
    assert_eq!(volume, Some(Value::Integer(49)));
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "call must run exactly once"
    );
    assert!(client.core().pending().is_empty());
}

/// Blocking `get` waits for the poll answer.
#[test]
fn test_get_blocks_until_value_arrives() {
    let (_server, client) = pair();
    client.connect().expect("in-process connect");

    assert_eq!(client.get("volume").expect("value"), Value::Integer(49));
}

/// `volume = 200` is outside 0..98: rejected synchronously, nothing reaches
/// the server, and the cached value stays.
#[test]
fn test_out_of_domain_set_is_rejected_without_traffic() {
    // Arrange
    let (server, client) = pair();
    client.connect().expect("in-process connect");
    assert_eq!(client.get("volume").expect("value"), Value::Integer(49));
    let recorder = Arc::new(Recorder::default());
    server.bind(recorder.clone());

    // Act
    let result = client.set("volume", Value::Integer(200));
    thread::sleep(Duration::from_millis(200));

    // Assert
    assert!(matches!(result, Err(TargetError::Domain { .. })));
    assert!(recorder.sets.lock().unwrap().is_empty(), "server saw a write");
    assert_eq!(client.value("volume").ok(), Some(Value::Integer(49)));
    assert_eq!(server.value("volume").ok(), Some(Value::Integer(49)));
}

/// An in-domain write goes through the server and comes back as the
/// confirmed value.
#[test]
fn test_set_round_trips_through_server() {
    let (server, client) = pair();
    client.connect().expect("in-process connect");

    client.set("volume", Value::Integer(30)).expect("set");

    assert!(eventually(Duration::from_secs(2), || {
        client.value("volume").ok() == Some(Value::Integer(30))
    }));
    assert_eq!(server.value("volume").ok(), Some(Value::Integer(30)));
}

/// `XYZZY` matches nothing: only the fallback variable is set.
#[test]
fn test_unrecognised_line_goes_to_fallback() {
    // Arrange
    let (server, client) = pair();
    client.connect().expect("in-process connect");
    assert_eq!(client.get("power").expect("value"), Value::Bool(false));
    let recorder = Arc::new(Recorder::default());
    client.bind(recorder.clone());

    // Act
    server.broadcast("XYZZY").expect("server running");

    // Assert
    assert!(eventually(Duration::from_secs(2), || {
        client.value(FALLBACK_ID).ok() == Some(Value::from("XYZZY"))
    }));
    assert_eq!(
        *recorder.sets.lock().unwrap(),
        vec![(FALLBACK_ID.to_string(), Value::from("XYZZY"))]
    );
    assert_eq!(client.value("power").ok(), Some(Value::Bool(false)));
    assert!(client.value("volume").is_err(), "never polled");
}

/// Stopping the server disconnects the client: every variable is unset,
/// every pending call dropped, and `get` reports `NotAvailable`.
#[test]
fn test_disconnect_unsets_variables_and_drops_calls() {
    // Arrange
    let (server, client) = pair();
    client.connect().expect("in-process connect");
    assert_eq!(client.get("power").expect("value"), Value::Bool(false));
    let (tx, rx) = mpsc::channel::<()>();
    server.exit();
    assert!(client.core().wait_for_state(ConnectionState::Disconnected, Duration::from_secs(2)));

    // Act
    let call = client
        .schedule(&["volume"], None, move |_: &Resolved| tx.send(()).unwrap())
        .expect("schedule");

    // Assert
    assert!(client.value("power").is_err());
    assert!(matches!(client.get("power"), Err(TargetError::NotAvailable(_))));
    assert!(call.is_some());
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

/// A call whose dependency never arrives is dropped at its deadline and
/// never invoked.
#[test]
fn test_pending_call_expires_after_deadline() {
    // Arrange: a client that can never connect
    init_logging();
    let scheme = demo_scheme();
    let stopped = Arc::new(Server::new(
        Arc::clone(&scheme),
        TargetUri::new("demo", Vec::<String>::new()),
        None,
        fast_config(),
        Arc::new(DummyBackend),
    ));
    let client = Client::new(
        scheme,
        TargetUri::new("demo", Vec::<String>::new()),
        Endpoint::InProcess(stopped),
        fast_config(),
    );
    client.enter().expect("reactor starts");
    let (tx, rx) = mpsc::channel::<()>();

    // Act
    let call = client
        .schedule(&["volume"], Some(Duration::from_secs(2)), move |_: &Resolved| {
            tx.send(()).unwrap()
        })
        .expect("schedule")
        .expect("registered");
    let still_there_early = client.core().pending().contains(call);
    thread::sleep(Duration::from_millis(2300));

    // Assert
    assert!(still_there_early);
    assert!(!client.core().pending().contains(call));
    assert!(rx.try_recv().is_err(), "expired call must never run");
}

/// `enter` twice is harmless and `exit` leaves the target disconnected.
#[test]
fn test_enter_is_idempotent_and_exit_disconnects() {
    let (_server, client) = pair();

    client.enter().expect("first enter");
    client.enter().expect("second enter");
    assert!(client.wait_connected(Duration::from_secs(2)));

    client.exit();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.value("power").is_err());
}

/// A client can be entered again after exiting.
#[test]
fn test_reenter_after_exit_reconnects() {
    let (_server, client) = pair();
    client.connect().expect("first connect");
    client.exit();

    client.connect().expect("second connect");

    assert_eq!(client.get("power").expect("value"), Value::Bool(false));
}

/// Calling `get` from an observer (the reactor thread) must not deadlock.
#[test]
fn test_get_from_observer_does_not_block_reactor() {
    struct Nested {
        client: Mutex<Option<Arc<avsync::TargetCore>>>,
        seen: mpsc::Sender<bool>,
    }
    impl TargetObserver for Nested {
        fn on_connect(&self) {
            if let Some(core) = self.client.lock().unwrap().as_ref() {
                let unavailable = matches!(core.get("volume"), Err(TargetError::NotAvailable(_)));
                self.seen.send(unavailable).unwrap();
            }
        }
    }

    // Arrange
    let (_server, client) = pair();
    let (tx, rx) = mpsc::channel();
    let observer = Arc::new(Nested {
        client: Mutex::new(Some(Arc::clone(client.core()))),
        seen: tx,
    });
    client.bind(observer.clone());

    // Act
    client.connect().expect("connect");

    // Assert
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).ok(), Some(true));
    observer.client.lock().unwrap().take();
}

/// The answer lands after the deadline but before any idle tick could sweep
/// the call: it must still never run.
#[test]
fn test_value_after_deadline_does_not_run_call() {
    // Arrange: no sweep for two seconds
    let config = TargetConfig {
        idle_tick: Duration::from_secs(2),
        ..fast_config()
    };
    let (_server, client) = pair_with(
        Arc::new(SlowBackend {
            delay: Duration::from_millis(150),
        }),
        config,
    );
    client.connect().expect("in-process connect");
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    // Act
    let call = client
        .schedule(&["volume"], Some(Duration::from_millis(20)), move |_: &Resolved| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("schedule")
        .expect("registered");
    let arrived = eventually(Duration::from_secs(1), || {
        client.value("volume").ok() == Some(Value::Integer(49))
    });
    thread::sleep(Duration::from_millis(100));

    // Assert
    assert!(arrived, "the late answer still updates the variable");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(!client.core().pending().contains(call));
}

/// A text carrying the line delimiter is a usage error: nothing is sent and
/// the connection, with its values, survives.
#[test]
fn test_value_with_delimiter_is_refused_and_link_survives() {
    // Arrange
    let (_server, client) = pair();
    client.connect().expect("in-process connect");
    assert_eq!(client.get("power").expect("value"), Value::Bool(false));

    // Act
    let result = client.set(FALLBACK_ID, Value::from("A\rB"));
    thread::sleep(Duration::from_millis(100));

    // Assert
    assert!(matches!(result, Err(TargetError::Encode { .. })));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.value("power").ok(), Some(Value::Bool(false)));
}

/// A raw line the framing cannot carry is dropped; later lines still reach
/// the peer.
#[test]
fn test_unframeable_broadcast_is_dropped_without_closing_peer() {
    let (server, client) = pair();
    client.connect().expect("in-process connect");
    assert_eq!(client.get("power").expect("value"), Value::Bool(false));

    server.broadcast("A\rB").expect("server running");
    server.broadcast("XYZZY").expect("server running");

    assert!(eventually(Duration::from_secs(2), || {
        client.value(FALLBACK_ID).ok() == Some(Value::from("XYZZY"))
    }));
    assert_eq!(client.state(), ConnectionState::Connected);
}

/// An observer restarting the client from the reactor thread leaves the new
/// reactor in charge: it connects and answers `get`.
#[test]
fn test_restart_from_observer_keeps_new_reactor_usable() {
    struct Restarter {
        client: Mutex<Option<Arc<Client>>>,
        restarted: AtomicBool,
        connects: AtomicUsize,
    }
    impl TargetObserver for Restarter {
        fn on_connect(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.restarted.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(client) = self.client.lock().unwrap().as_ref() {
                client.exit();
                client.enter().expect("re-enter from observer");
            }
        }
    }

    // Arrange
    let (_server, client) = pair();
    let client = Arc::new(client);
    let observer = Arc::new(Restarter {
        client: Mutex::new(Some(Arc::clone(&client))),
        restarted: AtomicBool::new(false),
        connects: AtomicUsize::new(0),
    });
    client.bind(observer.clone());

    // Act
    client.enter().expect("enter");
    let reconnected = eventually(Duration::from_secs(2), || {
        observer.connects.load(Ordering::SeqCst) >= 2
    });

    // Assert
    assert!(reconnected);
    assert!(client.wait_connected(Duration::from_secs(2)));
    assert_eq!(client.get("power").expect("value"), Value::Bool(false));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(client.state(), ConnectionState::Connected);
    observer.client.lock().unwrap().take();
    client.exit();
}

/// A hand-built config with a zero idle tick still runs.
#[test]
fn test_zero_idle_tick_is_clamped() {
    let config = TargetConfig {
        idle_tick: Duration::ZERO,
        ..fast_config()
    };
    let (_server, client) = pair_with(Arc::new(DummyBackend), config);

    client.connect().expect("in-process connect");

    assert_eq!(client.get("volume").expect("value"), Value::Integer(49));
}
