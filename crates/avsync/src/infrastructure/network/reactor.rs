//! The per-target I/O loop.
//!
//! Every client and every server gets one dedicated OS thread running a
//! single-threaded Tokio runtime.  The thread owns the sockets; the rest of
//! the program talks to it through two channels:
//!
//! ```text
//!   Target::enter/exit/attach ──► Control ──┐
//!                                           ├──► reactor thread ──► socket(s)
//!   TargetCore::send         ──► Outbound ──┘          │
//!                                                      ▼
//!                              TargetCore::receive / tick / mark_*
//! ```
//!
//! All variable stores, observer callbacks and pending-call invocations
//! triggered by received lines therefore run on the reactor thread.
//!
//! # Why a thread per target? (for beginners)
//!
//! The public API is synchronous: `get` blocks, `set` returns immediately.
//! Keeping each target's async runtime on its own thread means callers never
//! need a runtime of their own, and a slow observer on one target cannot
//! stall another.
//!
//! # Client loop
//!
//! Connects on the first idle tick, then reconnects every
//! `reconnect_interval` while disconnected.  A read error, a write error or
//! the peer closing the stream all lead to `Disconnected`.
//!
//! # Server loop
//!
//! Accepts TCP peers on an optional listener and in-process peers attached
//! through [`Control::Attach`].  Each peer runs in its own task and feeds
//! received lines into one inbound channel, so `receive` is only ever called
//! from the loop itself.

use std::collections::HashMap;
use std::future::{self, Future};
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use avsync_core::LineCodec;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::application::target::{
    ConnectionError, Outbound, PeerId, TargetConfig, TargetCore, TargetError,
};
use crate::infrastructure::network::endpoint::Endpoint;

/// Floor for `TargetConfig::idle_tick`.
const MIN_IDLE_TICK: Duration = Duration::from_millis(1);

/// Any byte stream a target can run its line protocol over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

type Connection = Framed<BoxedIo, LineCodec>;

/// Requests to a running reactor.
pub(crate) enum Control {
    /// Connect now instead of waiting for the next reconnect attempt.
    Connect(std::sync::mpsc::Sender<Result<(), ConnectionError>>),
    /// Serve an in-process peer.
    Attach(BoxedIo),
    Stop,
}

/// Owner's handle on a reactor thread.
pub(crate) struct ReactorHandle {
    control: UnboundedSender<Control>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl ReactorHandle {
    pub(crate) fn send(&self, control: Control) -> Result<(), ConnectionError> {
        self.control
            .send(control)
            .map_err(|_| ConnectionError::ReactorStopped)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the reactor and waits for its thread, unless called from that
    /// very thread (an observer calling `exit`), which cannot join itself.
    pub(crate) fn stop(mut self) {
        let _ = self.control.send(Control::Stop);
        if thread::current().id() == self.thread_id {
            debug!("exit requested from the reactor thread, not joining");
            return;
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("reactor thread panicked");
            }
        }
    }
}

/// Starts the reactor of a client connecting to `endpoint`.
pub(crate) fn spawn_client(
    core: Arc<TargetCore>,
    endpoint: Endpoint,
) -> Result<ReactorHandle, TargetError> {
    let name = format!("avsync-client-{}", core.scheme().id());
    spawn(name, core, move |core, control, outbound| {
        run_client(core, endpoint, control, outbound)
    })
}

/// Starts the reactor of a server, accepting TCP peers on `listener` if
/// there is one.
pub(crate) fn spawn_server(
    core: Arc<TargetCore>,
    listener: Option<std::net::TcpListener>,
) -> Result<ReactorHandle, TargetError> {
    let name = format!("avsync-server-{}", core.scheme().id());
    spawn(name, core, move |core, control, outbound| {
        run_server(core, listener, control, outbound)
    })
}

fn spawn<F, Fut>(name: String, core: Arc<TargetCore>, body: F) -> Result<ReactorHandle, TargetError>
where
    F: FnOnce(Arc<TargetCore>, UnboundedReceiver<Control>, UnboundedReceiver<Outbound>) -> Fut
        + Send
        + 'static,
    Fut: Future<Output = ()>,
{
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let generation = core.install_outbound(outbound_tx);

    let thread_core = Arc::clone(&core);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        thread_core.set_reactor_thread(Some(thread::current().id()));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            match runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt.block_on(body(Arc::clone(&thread_core), control_rx, outbound_rx)),
                Err(e) => error!("failed to create reactor runtime: {e}"),
            }
        }));
        if outcome.is_err() {
            error!(scheme = thread_core.scheme().id(), "reactor panicked");
        }
        // An observer may have exited and re-entered the target from this
        // thread; the newer reactor then owns the channel and the state.
        if thread_core.release_outbound(generation) {
            thread_core.mark_disconnected();
            thread_core.set_reactor_thread(None);
        } else {
            debug!("reactor replaced, leaving state to its successor");
        }
    });

    match spawned {
        Ok(handle) => Ok(ReactorHandle {
            control: control_tx,
            thread_id: handle.thread().id(),
            thread: Some(handle),
        }),
        Err(e) => {
            core.release_outbound(generation);
            Err(TargetError::Spawn(e))
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

async fn run_client(
    core: Arc<TargetCore>,
    endpoint: Endpoint,
    mut control: UnboundedReceiver<Control>,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    let config = core.config().clone();
    let codec = LineCodec::new(core.scheme().delimiter(), config.max_line_length);
    let mut conn: Option<Connection> = None;
    let mut next_attempt = Instant::now();
    let mut ticker = idle_ticker(&config);

    loop {
        tokio::select! {
            cmd = control.recv() => match cmd {
                Some(Control::Connect(reply)) => {
                    let result = if conn.is_some() {
                        Ok(())
                    } else {
                        match open(&core, &endpoint, &codec).await {
                            Ok(c) => {
                                conn = Some(c);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    };
                    next_attempt = Instant::now() + config.reconnect_interval;
                    let _ = reply.send(result);
                }
                Some(Control::Attach(_)) => warn!("a client cannot serve attached peers"),
                Some(Control::Stop) | None => break,
            },

            out = outbound.recv() => {
                let line = match out {
                    Some(Outbound::Send(line)) | Some(Outbound::Reply { line, .. }) => line,
                    None => break,
                };
                match conn.as_mut() {
                    Some(framed) => match framed.send(line).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                            warn!("dropping unframeable line: {e}");
                        }
                        Err(e) => {
                            warn!("write to {endpoint} failed: {e}");
                            conn = None;
                            core.mark_disconnected();
                            next_attempt = Instant::now() + config.reconnect_interval;
                        }
                    },
                    None => debug!(%line, "not connected, dropping line"),
                }
            }

            received = next_line(&mut conn) => match received {
                Some(Ok(line)) => core.receive(None, &line),
                Some(Err(e)) => {
                    warn!("read from {endpoint} failed: {e}");
                    conn = None;
                    core.mark_disconnected();
                    next_attempt = Instant::now() + config.reconnect_interval;
                }
                None => {
                    info!("{endpoint} closed the connection");
                    conn = None;
                    core.mark_disconnected();
                    next_attempt = Instant::now() + config.reconnect_interval;
                }
            },

            _ = ticker.tick() => {
                let now = Instant::now();
                core.tick(now);
                if conn.is_none() && now >= next_attempt {
                    next_attempt = now + config.reconnect_interval;
                    if let Ok(c) = open(&core, &endpoint, &codec).await {
                        conn = Some(c);
                    }
                }
            }
        }
    }

    debug!("client reactor for {endpoint} stopped");
}

/// The idle ticker.  `tokio::time::interval` rejects a zero period.
fn idle_ticker(config: &TargetConfig) -> time::Interval {
    let mut ticker = time::interval(config.idle_tick.max(MIN_IDLE_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Connects and announces the state transitions on the way.
async fn open(
    core: &TargetCore,
    endpoint: &Endpoint,
    codec: &LineCodec,
) -> Result<Connection, ConnectionError> {
    core.mark_connecting();
    match endpoint.connect(core.config().connect_timeout).await {
        Ok(io) => {
            let framed = Framed::new(io, codec.clone());
            core.mark_connected();
            Ok(framed)
        }
        Err(e) => {
            debug!("connecting to {endpoint} failed: {e}");
            core.mark_disconnected();
            Err(e)
        }
    }
}

async fn next_line(conn: &mut Option<Connection>) -> Option<io::Result<String>> {
    match conn {
        Some(framed) => framed.next().await,
        None => future::pending().await,
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

enum PeerEvent {
    Line(String),
    Closed,
}

async fn run_server(
    core: Arc<TargetCore>,
    listener: Option<std::net::TcpListener>,
    mut control: UnboundedReceiver<Control>,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    let listener = match listener.map(TcpListener::from_std).transpose() {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to register listener with the runtime: {e}");
            return;
        }
    };
    let config = core.config().clone();
    let codec = LineCodec::new(core.scheme().delimiter(), config.max_line_length);
    let (events_tx, mut events) = mpsc::unbounded_channel::<(PeerId, PeerEvent)>();
    let mut peers: HashMap<PeerId, UnboundedSender<String>> = HashMap::new();
    let mut next_peer = 0u64;
    let mut ticker = idle_ticker(&config);

    loop {
        tokio::select! {
            accepted = accept(&listener) => match accepted {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    next_peer += 1;
                    let id = PeerId(next_peer);
                    info!(peer = id.0, %addr, "peer connected");
                    peers.insert(id, spawn_peer(id, Box::new(stream), codec.clone(), events_tx.clone()));
                }
                Err(e) => warn!("accept failed: {e}"),
            },

            cmd = control.recv() => match cmd {
                Some(Control::Attach(io)) => {
                    next_peer += 1;
                    let id = PeerId(next_peer);
                    debug!(peer = id.0, "in-process peer attached");
                    peers.insert(id, spawn_peer(id, io, codec.clone(), events_tx.clone()));
                }
                Some(Control::Connect(reply)) => {
                    let _ = reply.send(Ok(()));
                }
                Some(Control::Stop) | None => break,
            },

            out = outbound.recv() => match out {
                Some(Outbound::Send(line)) => {
                    peers.retain(|_, peer| peer.send(line.clone()).is_ok());
                }
                Some(Outbound::Reply { peer, line }) => {
                    if let Some(tx) = peers.get(&peer) {
                        let _ = tx.send(line);
                    }
                }
                None => break,
            },

            Some((peer, event)) = events.recv() => match event {
                PeerEvent::Line(line) => core.receive(Some(peer), &line),
                PeerEvent::Closed => {
                    peers.remove(&peer);
                    info!(peer = peer.0, "peer disconnected");
                }
            },

            _ = ticker.tick() => core.tick(Instant::now()),
        }
    }

    debug!(peers = peers.len(), "server reactor stopped");
}

async fn accept(listener: &Option<TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => future::pending().await,
    }
}

/// Runs one peer in its own task.  Returns the sender for lines to it.
fn spawn_peer(
    id: PeerId,
    io: BoxedIo,
    codec: LineCodec,
    events: UnboundedSender<(PeerId, PeerEvent)>,
) -> UnboundedSender<String> {
    let (tx, mut lines) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut framed = Framed::new(io, codec);
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => match framed.send(line).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                            warn!(peer = id.0, "dropping unframeable line: {e}");
                        }
                        Err(e) => {
                            debug!(peer = id.0, "write failed: {e}");
                            break;
                        }
                    },
                    None => break,
                },
                received = framed.next() => match received {
                    Some(Ok(line)) => {
                        if events.send((id, PeerEvent::Line(line))).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(peer = id.0, "read failed: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }
        let _ = events.send((id, PeerEvent::Closed));
    });
    tx
}
