//! Integration tests over real loopback TCP sockets.
//!
//! # Purpose
//!
//! A small fake receiver (plain `std::net`, one thread per connection)
//! stands in for a Denon AVR.  It answers polls from a fixed table and
//! confirms every write by echoing it, the way the real device does.
//!
//! These tests verify:
//!
//! - A client built from a `denon:` URI reads the device state.
//! - Unrecognised device lines land in the fallback variable.
//! - The client reconnects after the device drops the connection.
//! - A dummy server speaks the wire protocol to a raw telnet-style peer.
//! - A proxy republishes the device and forwards writes to it.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use avsync::{
    Client, SchemeRegistry, SharedVariable, Target, TargetConfig, TargetObserver, TargetUri, Value,
    FALLBACK_ID,
};

// ── Fake device ───────────────────────────────────────────────────────────────

struct FakeDevice {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    streams: Arc<Mutex<Vec<TcpStream>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeDevice {
    fn start() -> Self {
        let answers: HashMap<&'static str, &'static str> = [
            ("PW?", "PWON"),
            ("MV?", "MV495"),
            ("MU?", "MUOFF"),
            ("SI?", "SICD"),
        ]
        .into_iter()
        .collect();
        let answers = Arc::new(answers);

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake device");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("local addr");
        let running = Arc::new(AtomicBool::new(true));
        let streams = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));

        let (run, conns, log) = (Arc::clone(&running), Arc::clone(&streams), Arc::clone(&received));
        thread::spawn(move || {
            while run.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).expect("blocking stream");
                        conns.lock().unwrap().push(stream.try_clone().expect("clone"));
                        let (answers, log) = (Arc::clone(&answers), Arc::clone(&log));
                        thread::spawn(move || serve(stream, &answers, &log));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            running,
            streams,
            received,
        }
    }

    fn uri(&self) -> TargetUri {
        TargetUri::new("denon", [self.addr.ip().to_string(), self.addr.port().to_string()])
    }

    /// Pushes an unsolicited line to every connection.
    fn broadcast(&self, line: &str) {
        for stream in self.streams.lock().unwrap().iter_mut() {
            let _ = stream.write_all(format!("{line}\r").as_bytes());
        }
    }

    /// Drops every open connection.
    fn kick(&self) {
        for stream in self.streams.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.kick();
    }
}

fn serve(stream: TcpStream, answers: &HashMap<&str, &str>, log: &Mutex<Vec<String>>) {
    let mut writer = stream.try_clone().expect("clone");
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf).trim_end_matches('\r').to_string();
        log.lock().unwrap().push(line.clone());
        let reply = match answers.get(line.as_str()) {
            Some(answer) => answer.to_string(),
            None if line.ends_with('?') => continue,
            None => line,
        };
        if writer.write_all(format!("{reply}\r").as_bytes()).is_err() {
            return;
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

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

fn registry() -> SchemeRegistry {
    init_logging();
    SchemeRegistry::with_builtin().expect("built-in schemes")
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

#[derive(Default)]
struct Counter {
    connects: AtomicUsize,
    fallback: Mutex<Vec<Value>>,
}

impl TargetObserver for Counter {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_set(&self, variable: &SharedVariable, value: &Value) {
        if variable.id() == FALLBACK_ID {
            self.fallback.lock().unwrap().push(value.clone());
        }
    }
}

/// A raw line-protocol peer, like a telnet session.
struct RawPeer {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl RawPeer {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect raw peer");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");
        Self {
            writer: stream.try_clone().expect("clone"),
            reader: BufReader::new(stream),
        }
    }

    fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r").as_bytes())
            .expect("write");
    }

    /// Reads lines until one equals `wanted`.  False on timeout.
    fn expect_line(&mut self, wanted: &str) -> bool {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_until(b'\r', &mut buf) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {
                    if String::from_utf8_lossy(&buf).trim_end_matches('\r') == wanted {
                        return true;
                    }
                }
            }
        }
    }
}

// ── Client against a device ───────────────────────────────────────────────────

/// `PWON` and `MV495` decode to `true` and `49.5`.
#[test]
fn test_client_reads_device_state() {
    // Arrange
    let device = FakeDevice::start();
    let client = registry()
        .new_client(&device.uri(), fast_config())
        .expect("client");

    // Act
    client.connect().expect("connect to fake device");

    // Assert
    assert_eq!(client.get("power").expect("power"), Value::Bool(true));
    assert_eq!(client.get("volume").expect("volume"), Value::Decimal(49.5));
    assert_eq!(client.get("source").expect("source"), Value::from("CD"));
    assert!(device.received().contains(&"PW?".to_string()));
}

/// A write goes out as a wire line and the device's echo confirms it.
#[test]
fn test_client_write_reaches_device() {
    let device = FakeDevice::start();
    let client = registry()
        .new_client(&device.uri(), fast_config())
        .expect("client");
    client.connect().expect("connect");
    assert_eq!(client.get("mute").expect("mute"), Value::Bool(false));

    client.set("mute", Value::Bool(true)).expect("set");

    assert!(eventually(Duration::from_secs(2), || {
        client.value("mute").ok() == Some(Value::Bool(true))
    }));
    assert!(device.received().contains(&"MUON".to_string()));
}

/// `XYZZY` is no variable's line: only the fallback sees it.
#[test]
fn test_unknown_device_line_sets_fallback() {
    // Arrange
    let device = FakeDevice::start();
    let client = registry()
        .new_client(&device.uri(), fast_config())
        .expect("client");
    client.connect().expect("connect");
    assert_eq!(client.get("power").expect("power"), Value::Bool(true));
    let counter = Arc::new(Counter::default());
    client.bind(counter.clone());

    // Act
    device.broadcast("XYZZY");

    // Assert
    assert!(eventually(Duration::from_secs(2), || {
        !counter.fallback.lock().unwrap().is_empty()
    }));
    assert_eq!(*counter.fallback.lock().unwrap(), vec![Value::from("XYZZY")]);
    assert_eq!(client.value("power").ok(), Some(Value::Bool(true)));
}

/// The device dropping the connection unsets values; the client reconnects
/// on its own and preloads again.
#[test]
fn test_client_reconnects_after_device_drop() {
    // Arrange
    let device = FakeDevice::start();
    let client: Client = registry()
        .new_client(&device.uri(), fast_config())
        .expect("client");
    let counter = Arc::new(Counter::default());
    client.bind(counter.clone());
    client.connect().expect("connect");
    assert!(eventually(Duration::from_secs(2), || client.value("power").is_ok()));

    // Act
    device.kick();

    // Assert
    assert!(eventually(Duration::from_secs(3), || {
        counter.connects.load(Ordering::SeqCst) >= 2
    }));
    assert_eq!(client.get("power").expect("power after reconnect"), Value::Bool(true));
}

// ── Servers ───────────────────────────────────────────────────────────────────

/// A dummy server answers a poll with the default value and rebroadcasts a
/// write to every peer.
#[test]
fn test_dummy_server_speaks_wire_protocol() {
    // Arrange
    let registry = registry();
    let uri = TargetUri::parse("denon:127.0.0.1:0").expect("uri");
    let server = registry.new_dummy_server(&uri, fast_config()).expect("server");
    server.enter().expect("listen");
    let addr = server.local_addr().expect("bound address");
    let mut first = RawPeer::connect(addr);
    let mut second = RawPeer::connect(addr);

    // Act / Assert
    first.send("PW?");
    assert!(first.expect_line("PWSTANDBY"));

    first.send("MV30");
    assert!(first.expect_line("MV30"));
    assert!(second.expect_line("MV30"));
    assert!(eventually(Duration::from_secs(1), || {
        server.value("volume").ok() == Some(Value::Decimal(30.0))
    }));
}

/// A server refuses a second bind of a port already in use.
#[test]
fn test_server_bind_conflict_is_reported() {
    let registry = registry();
    let taken = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = taken.local_addr().expect("addr").port();
    let uri = TargetUri::new("denon", ["127.0.0.1".to_string(), port.to_string()]);
    let server = registry.new_dummy_server(&uri, fast_config()).expect("server");

    let result = server.enter();

    assert!(matches!(result, Err(avsync::TargetError::Bind { .. })));
}

/// device ◄─ proxy ◄─ client: reads come from the device, writes reach it.
#[test]
fn test_proxy_republishes_device() {
    // Arrange
    let device = FakeDevice::start();
    let registry = registry();
    let listen = TargetUri::parse("denon:127.0.0.1:0").expect("uri");
    let proxy = registry
        .new_proxy(&device.uri(), &listen, fast_config())
        .expect("proxy");
    proxy.enter().expect("proxy enters");
    let addr = proxy.server().local_addr().expect("proxy address");
    let client = registry
        .new_client(
            &TargetUri::new("denon", [addr.ip().to_string(), addr.port().to_string()]),
            fast_config(),
        )
        .expect("client");
    client.connect().expect("connect to proxy");

    // Act / Assert: read through
    assert_eq!(client.get("power").expect("power"), Value::Bool(true));
    assert_eq!(client.get("volume").expect("volume"), Value::Decimal(49.5));

    // Act / Assert: write through
    client.set("mute", Value::Bool(true)).expect("set");
    assert!(eventually(Duration::from_secs(2), || {
        client.value("mute").ok() == Some(Value::Bool(true))
    }));
    assert!(device.received().contains(&"MUON".to_string()));

    // Act / Assert: unknown device lines pass through
    let counter = Arc::new(Counter::default());
    client.bind(counter.clone());
    device.broadcast("XYZZY");
    assert!(eventually(Duration::from_secs(2), || {
        counter.fallback.lock().unwrap().contains(&Value::from("XYZZY"))
    }));
}
