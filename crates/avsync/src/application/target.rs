//! The target state machine shared by clients and servers.
//!
//! A [`TargetCore`] owns one [`SharedVariable`] per variable of its scheme
//! (plus the fallback), the connection state, the pending calls and the
//! observers.  It does no I/O itself: lines to send are handed to the
//! reactor through an unbounded channel, and the reactor feeds received lines
//! back through [`TargetCore::receive`].
//!
//! # Roles
//!
//! ```text
//!                 client                          server
//! set(v)    check, encode, send          check, store, rebroadcast
//! poll      send poll command,           ask the backend, which
//!           arm default-value timer      stores the answer
//! receive   decode into every matching   answer polls, hand writes
//!           variable, else fallback      to the backend, else fallback
//! ```
//!
//! # Connection states
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └───────────────┴──────────────┘  (error, exit)
//! ```
//!
//! Entering `Connected` polls the scheme's preload variables and every
//! variable a pending call still waits for.  Leaving it unsets every variable
//! and drops every pending call.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use avsync_core::{DomainError, EncodeError, Scheme, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use crate::application::backend::{Responder, ServerBackend};
use crate::application::lock;
use crate::application::observer::TargetObserver;
use crate::application::pending::{CallId, PendingCalls, Resolved};
use crate::application::variable::{NotAvailable, SharedVariable};

// ── Errors ────────────────────────────────────────────────────────────────────

/// The transport is unavailable.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connecting to {addr} timed out after {after:?}")]
    TimedOut { addr: String, after: Duration },
    #[error("in-process server for {0} is not running")]
    ServerNotRunning(String),
    #[error("reactor is not running")]
    ReactorStopped,
}

/// Errors returned by target operations.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The id names no variable of the scheme.  A programming error.
    #[error("unknown variable {0}")]
    UnknownVariable(String),

    #[error("variable {0} has no value yet")]
    NotAvailable(String),

    /// A blocking `get` gave up.
    #[error("no value for {variable} within {after:?}")]
    Timeout { variable: String, after: Duration },

    #[error("invalid value for {variable}: {source}")]
    Domain {
        variable: String,
        #[source]
        source: DomainError,
    },

    #[error("cannot encode value for {variable}: {source}")]
    Encode {
        variable: String,
        #[source]
        source: EncodeError,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The reactor thread could not be started.
    #[error("failed to start reactor thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl From<NotAvailable> for TargetError {
    fn from(e: NotAvailable) -> Self {
        TargetError::NotAvailable(e.0)
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Timing and framing parameters of a target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    /// Pause between reconnect attempts of a client.
    pub reconnect_interval: Duration,
    /// Period of the reactor's idle tick (sweeps, poll timers, reconnects).
    pub idle_tick: Duration,
    pub connect_timeout: Duration,
    /// How long a poll may go unanswered before the default value applies.
    pub poll_timeout: Duration,
    /// How long the blocking `get` waits.
    pub get_timeout: Duration,
    /// Bound on a single received line.
    pub max_line_length: usize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(3000),
            idle_tick: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(3000),
            poll_timeout: Duration::from_millis(3000),
            get_timeout: Duration::from_millis(5000),
            max_line_length: 4096,
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// A connected peer of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

/// A line for the reactor to write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// To the device (client) or to every peer (server).
    Send(String),
    /// To one peer of a server.
    Reply { peer: PeerId, line: String },
}

enum RoleKind {
    Client,
    Server(Arc<dyn ServerBackend>),
}

/// Shared state and rules of one client or server.
pub struct TargetCore {
    scheme: Arc<Scheme>,
    config: TargetConfig,
    role: RoleKind,
    variables: Vec<Arc<SharedVariable>>,
    index: HashMap<String, Arc<SharedVariable>>,
    fallback: Arc<SharedVariable>,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    pending: PendingCalls,
    observers: RwLock<Vec<Arc<dyn TargetObserver>>>,
    /// The running reactor's channel, tagged with the generation that
    /// installed it.
    outbound: Mutex<Option<(u64, UnboundedSender<Outbound>)>>,
    generation: AtomicU64,
    reactor_thread: Mutex<Option<ThreadId>>,
    this: Weak<TargetCore>,
}

impl fmt::Debug for TargetCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetCore")
            .field("scheme", &self.scheme.id())
            .field("role", &self.role())
            .field("state", &self.state())
            .field("pending", &self.pending)
            .finish()
    }
}

impl TargetCore {
    pub fn client(scheme: Arc<Scheme>, config: TargetConfig) -> Arc<Self> {
        Self::build(scheme, config, RoleKind::Client)
    }

    pub fn server(
        scheme: Arc<Scheme>,
        config: TargetConfig,
        backend: Arc<dyn ServerBackend>,
    ) -> Arc<Self> {
        Self::build(scheme, config, RoleKind::Server(backend))
    }

    fn build(scheme: Arc<Scheme>, config: TargetConfig, role: RoleKind) -> Arc<Self> {
        let variables: Vec<Arc<SharedVariable>> = scheme
            .variables()
            .iter()
            .map(|def| Arc::new(SharedVariable::new(Arc::clone(def))))
            .collect();
        let fallback = Arc::new(SharedVariable::new(Arc::clone(scheme.fallback())));
        let mut index: HashMap<String, Arc<SharedVariable>> = variables
            .iter()
            .map(|v| (v.id().to_string(), Arc::clone(v)))
            .collect();
        index.insert(fallback.id().to_string(), Arc::clone(&fallback));

        Arc::new_cyclic(|this| Self {
            scheme,
            config,
            role,
            variables,
            index,
            fallback,
            state: Mutex::new(ConnectionState::Disconnected),
            state_changed: Condvar::new(),
            pending: PendingCalls::new(),
            observers: RwLock::new(Vec::new()),
            outbound: Mutex::new(None),
            generation: AtomicU64::new(0),
            reactor_thread: Mutex::new(None),
            this: this.clone(),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        match self.role {
            RoleKind::Client => Role::Client,
            RoleKind::Server(_) => Role::Server,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Declared variables in declaration order, without the fallback.
    pub fn variables(&self) -> &[Arc<SharedVariable>] {
        &self.variables
    }

    pub fn fallback(&self) -> &Arc<SharedVariable> {
        &self.fallback
    }

    /// Looks up a variable, the fallback included.
    ///
    /// # Errors
    ///
    /// [`TargetError::UnknownVariable`] if the scheme has no such variable.
    pub fn variable(&self, id: &str) -> Result<&Arc<SharedVariable>, TargetError> {
        self.index
            .get(id)
            .ok_or_else(|| TargetError::UnknownVariable(id.to_string()))
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Appends an observer.  Existing observers stay in place.
    pub fn bind(&self, observer: Arc<dyn TargetObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn observers(&self) -> Vec<Arc<dyn TargetObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn responder(&self, variable: &Arc<SharedVariable>) -> Responder {
        Responder::new(self.this.clone(), Arc::clone(variable))
    }

    // ── Reading ───────────────────────────────────────────────────────────────

    /// The cached value, without waiting.
    ///
    /// # Errors
    ///
    /// [`TargetError::NotAvailable`] while unset.
    pub fn value(&self, id: &str) -> Result<Value, TargetError> {
        Ok(self.variable(id)?.get()?)
    }

    /// The value of `id`, waiting up to the configured `get_timeout` for it
    /// to arrive.
    ///
    /// Built on [`TargetCore::schedule`]: the wait is a pending call that
    /// hands the value to this thread.
    ///
    /// # Errors
    ///
    /// - [`TargetError::NotAvailable`] when the target is not connected, when
    ///   it disconnects during the wait, or when called from the reactor
    ///   thread, which must never block.
    /// - [`TargetError::Timeout`] when no value arrived in time.
    pub fn get(&self, id: &str) -> Result<Value, TargetError> {
        let variable = Arc::clone(self.variable(id)?);
        if let Some(value) = variable.value() {
            return Ok(value);
        }
        if !self.is_connected() || self.on_reactor_thread() {
            return Err(TargetError::NotAvailable(id.to_string()));
        }

        let timeout = self.config.get_timeout;
        let (tx, rx) = std::sync::mpsc::channel();
        let key = id.to_string();
        // The call outlives the wait by one tick so it is cancelled here
        // rather than swept.
        let call = self.schedule(
            &[id],
            Some(timeout + self.config.idle_tick),
            move |resolved: &Resolved| {
                let _ = tx.send(resolved.get(&key).cloned());
            },
        )?;

        match rx.recv_timeout(timeout) {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                Err(TargetError::NotAvailable(id.to_string()))
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(call) = call {
                    self.pending.cancel(call);
                }
                Err(TargetError::Timeout {
                    variable: id.to_string(),
                    after: timeout,
                })
            }
        }
    }

    // ── Writing ───────────────────────────────────────────────────────────────

    /// Changes `id` to `value`.
    ///
    /// A client encodes and sends the value and waits for the device to echo
    /// it back; the cached value is untouched until then.  A server stores
    /// and rebroadcasts it.
    ///
    /// # Errors
    ///
    /// [`TargetError::Domain`] for out-of-domain values, in which case
    /// nothing is sent and nothing is stored; [`TargetError::Encode`] and
    /// [`TargetError::Connection`] for values that cannot be sent.
    pub fn set(&self, id: &str, value: Value) -> Result<(), TargetError> {
        let variable = Arc::clone(self.variable(id)?);
        self.write_variable(&variable, value, false)
    }

    /// Like [`TargetCore::set`] but sends out-of-domain values as they are,
    /// with a warning.
    pub fn force_set(&self, id: &str, value: Value) -> Result<(), TargetError> {
        let variable = Arc::clone(self.variable(id)?);
        self.write_variable(&variable, value, true)
    }

    pub(crate) fn write_variable(
        &self,
        variable: &Arc<SharedVariable>,
        value: Value,
        force: bool,
    ) -> Result<(), TargetError> {
        let value = match variable.def().check(value.clone()) {
            Ok(checked) => checked,
            Err(e) if force => {
                warn!(variable = variable.id(), error = %e, "sending out-of-domain value");
                variable.def().domain().coerce(value.clone()).unwrap_or(value)
            }
            Err(source) => {
                return Err(TargetError::Domain {
                    variable: variable.id().to_string(),
                    source,
                })
            }
        };

        let line = self.encode_line(variable, &value)?;
        match self.role {
            RoleKind::Client => {
                if !self.is_connected() {
                    return Err(ConnectionError::NotConnected.into());
                }
                let rounded = variable.def().domain().round(&value);
                if !variable.claim_write(&line, &rounded) {
                    trace!(variable = variable.id(), %line, "value already confirmed, not resending");
                    return Ok(());
                }
                debug!(variable = variable.id(), %line, "sending");
                self.send(Outbound::Send(line))?;
                Ok(())
            }
            RoleKind::Server(_) => {
                self.store(variable, value);
                Ok(())
            }
        }
    }

    /// Encodes `value` into a line the framing can carry.
    fn encode_line(&self, variable: &SharedVariable, value: &Value) -> Result<String, TargetError> {
        let encode_error = |source| TargetError::Encode {
            variable: variable.id().to_string(),
            source,
        };
        let line = variable.def().encode(value).map_err(encode_error)?;
        if line.as_bytes().contains(&self.scheme.delimiter()) {
            return Err(encode_error(EncodeError::Unrepresentable {
                value: value.to_string(),
                reason: "it contains the line delimiter".to_string(),
            }));
        }
        Ok(line)
    }

    /// Stores `value`, fires observers and resolves pending calls.
    ///
    /// A server also rebroadcasts every store, changed or not.
    pub(crate) fn store(&self, variable: &Arc<SharedVariable>, value: Value) {
        {
            let _order = variable.order_guard();
            let outcome = variable.store(value.clone());
            if outcome.changed {
                debug!(variable = variable.id(), %value, first = outcome.first, "value changed");
            }
            if matches!(self.role, RoleKind::Server(_)) && !Arc::ptr_eq(variable, &self.fallback) {
                self.resend(variable, &value);
            }
            let observers = self.observers();
            for observer in &observers {
                observer.on_set(variable, &value);
            }
            if outcome.changed {
                for observer in &observers {
                    observer.on_change(variable, &value);
                }
            }
        }
        for call in self.pending.resolve(variable.id()) {
            call.invoke();
        }
    }

    fn resend(&self, variable: &SharedVariable, value: &Value) {
        match variable.def().encode(value) {
            Ok(line) => {
                if let Err(e) = self.send(Outbound::Send(line)) {
                    trace!(variable = variable.id(), error = %e, "nobody to rebroadcast to");
                }
            }
            Err(e) => warn!(variable = variable.id(), error = %e, "cannot rebroadcast value"),
        }
    }

    /// Writes a raw line, bypassing every variable.
    pub(crate) fn send_line(&self, line: &str) -> Result<(), ConnectionError> {
        self.send(Outbound::Send(line.to_string()))
    }

    /// Hands `out` to the reactor.
    pub(crate) fn send(&self, out: Outbound) -> Result<(), ConnectionError> {
        let guard = lock(&self.outbound);
        let (_, tx) = guard.as_ref().ok_or(ConnectionError::NotConnected)?;
        tx.send(out).map_err(|_| ConnectionError::ReactorStopped)
    }

    // ── Polling and scheduling ────────────────────────────────────────────────

    /// Asks for the current value of `id` without waiting for it.
    ///
    /// # Errors
    ///
    /// [`TargetError::Connection`] when a client is not connected.
    pub fn poll(&self, id: &str) -> Result<(), TargetError> {
        let variable = Arc::clone(self.variable(id)?);
        self.poll_variable(&variable)
    }

    fn poll_variable(&self, variable: &Arc<SharedVariable>) -> Result<(), TargetError> {
        match &self.role {
            RoleKind::Client => {
                let Some(command) = variable.def().poll_command() else {
                    return Ok(());
                };
                if !self.is_connected() {
                    return Err(ConnectionError::NotConnected.into());
                }
                let now = Instant::now();
                if !variable.begin_poll(now, now + self.config.poll_timeout) {
                    trace!(variable = variable.id(), "poll already outstanding");
                    return Ok(());
                }
                trace!(variable = variable.id(), %command, "polling");
                self.send(Outbound::Send(command))?;
                Ok(())
            }
            RoleKind::Server(backend) => {
                backend.poll(variable, self.responder(variable));
                Ok(())
            }
        }
    }

    /// Runs `f` once every variable in `requires` holds a value.
    ///
    /// If they all do already, `f` runs right away on this thread and `None`
    /// is returned.  Otherwise the call is registered, the missing variables
    /// are polled, and its id is returned.  The call is dropped without
    /// running if `timeout` elapses first or the target disconnects.
    ///
    /// # Errors
    ///
    /// [`TargetError::UnknownVariable`] if any id is unknown; nothing is
    /// registered in that case.
    pub fn schedule<F>(
        &self,
        requires: &[&str],
        timeout: Option<Duration>,
        f: F,
    ) -> Result<Option<CallId>, TargetError>
    where
        F: FnOnce(&Resolved) + Send + 'static,
    {
        let vars = requires
            .iter()
            .map(|id| self.variable(id).map(Arc::clone))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(resolved) = Resolved::snapshot(&vars) {
            f(&resolved);
            return Ok(None);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let id = self.pending.register(vars.clone(), deadline, Box::new(f));
        // A value may have landed between the snapshot and the registration.
        if let Some(ready) = self.pending.resolve_call(id) {
            ready.invoke();
            return Ok(None);
        }

        for var in vars.iter().filter(|v| !v.is_set()) {
            if let Err(e) = self.poll_variable(var) {
                debug!(variable = var.id(), error = %e, "poll deferred until connected");
            }
        }
        Ok(Some(id))
    }

    /// Drops a pending call without running it.
    pub fn cancel(&self, call: CallId) -> bool {
        self.pending.cancel(call)
    }

    // ── Reactor side ──────────────────────────────────────────────────────────

    /// Dispatches one received line.
    pub(crate) fn receive(&self, peer: Option<PeerId>, line: &str) {
        trace!(role = %self.role(), %line, "received");
        match &self.role {
            RoleKind::Client => self.receive_as_client(line),
            RoleKind::Server(backend) => self.receive_as_server(backend.as_ref(), peer, line),
        }
    }

    fn receive_as_client(&self, line: &str) {
        let mut decoded = false;
        for variable in &self.variables {
            if !variable.def().matches(line) {
                continue;
            }
            match variable.def().decode(line) {
                Ok(value) => {
                    self.store(variable, value);
                    decoded = true;
                }
                Err(e) => warn!(variable = variable.id(), %line, error = %e, "failed to decode line"),
            }
        }
        if !decoded {
            debug!(%line, "unrecognised line");
            self.store(&self.fallback, Value::Text(line.to_string()));
        }
    }

    fn receive_as_server(&self, backend: &dyn ServerBackend, peer: Option<PeerId>, line: &str) {
        if let Some(variable) = self.variables.iter().find(|v| v.def().is_poll(line)) {
            match variable.value() {
                Some(value) => self.reply(peer, variable, &value),
                None => backend.poll(variable, self.responder(variable)),
            }
            return;
        }

        let mut handled = false;
        for variable in &self.variables {
            if !variable.def().matches(line) {
                continue;
            }
            match variable.def().decode(line) {
                Ok(value) => {
                    handled = true;
                    backend.write(variable, value, self.responder(variable));
                }
                Err(e) => warn!(variable = variable.id(), %line, error = %e, "failed to decode line"),
            }
        }
        if !handled {
            debug!(%line, "unrecognised line");
            self.store(&self.fallback, Value::Text(line.to_string()));
            backend.unrecognized(line);
        }
    }

    fn reply(&self, peer: Option<PeerId>, variable: &SharedVariable, value: &Value) {
        let line = match variable.def().encode(value) {
            Ok(line) => line,
            Err(e) => {
                warn!(variable = variable.id(), error = %e, "cannot encode reply");
                return;
            }
        };
        let out = match peer {
            Some(peer) => Outbound::Reply { peer, line },
            None => Outbound::Send(line),
        };
        if let Err(e) = self.send(out) {
            debug!(variable = variable.id(), error = %e, "reply dropped");
        }
    }

    /// Idle-tick work: expire pending calls and unanswered polls.
    pub(crate) fn tick(&self, now: Instant) {
        let expired = self.pending.sweep(now);
        if expired > 0 {
            debug!(expired, "dropped expired pending calls");
        }
        for variable in &self.variables {
            if !variable.expire_poll(now) || variable.is_set() {
                continue;
            }
            match variable.def().default_value() {
                Some(default) => {
                    debug!(variable = variable.id(), %default, "poll unanswered, using default");
                    self.store(variable, default.clone());
                }
                None => debug!(variable = variable.id(), "poll unanswered"),
            }
        }
    }

    /// Routes [`TargetCore::send`] to `tx`.  Returns the generation to hand
    /// back to [`TargetCore::release_outbound`].
    pub(crate) fn install_outbound(&self, tx: UnboundedSender<Outbound>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *lock(&self.outbound) = Some((generation, tx));
        generation
    }

    /// Removes the channel installed as `generation`.  Returns `false`, and
    /// leaves the channel alone, when a newer reactor has replaced it.
    pub(crate) fn release_outbound(&self, generation: u64) -> bool {
        let mut outbound = lock(&self.outbound);
        match outbound.as_ref() {
            Some((current, _)) if *current != generation => false,
            _ => {
                *outbound = None;
                true
            }
        }
    }

    pub(crate) fn set_reactor_thread(&self, id: Option<ThreadId>) {
        *lock(&self.reactor_thread) = id;
    }

    pub(crate) fn on_reactor_thread(&self) -> bool {
        *lock(&self.reactor_thread) == Some(thread::current().id())
    }

    fn set_state(&self, next: ConnectionState) -> ConnectionState {
        let mut state = lock(&self.state);
        let previous = *state;
        *state = next;
        self.state_changed.notify_all();
        previous
    }

    /// Enters `Connecting`.  Coming straight from `Connected` (a reactor
    /// replaced before it could shut down) the old session ends first.
    pub(crate) fn mark_connecting(&self) {
        if self.set_state(ConnectionState::Connecting) == ConnectionState::Connected {
            self.end_session();
        }
    }

    /// Enters `Connected`, polls preload and pending variables, fires
    /// `on_connect`.
    pub(crate) fn mark_connected(&self) {
        self.set_state(ConnectionState::Connected);
        info!(scheme = self.scheme.id(), role = %self.role(), "connected");

        for id in self.scheme.preload() {
            if let Some(variable) = self.index.get(id) {
                if let Err(e) = self.poll_variable(variable) {
                    warn!(variable = %id, error = %e, "preload poll failed");
                }
            }
        }
        for variable in self.pending.missing() {
            if let Err(e) = self.poll_variable(&variable) {
                warn!(variable = variable.id(), error = %e, "pending poll failed");
            }
        }
        for observer in self.observers() {
            observer.on_connect();
        }
    }

    /// Enters `Disconnected`.  Coming from `Connected`, unsets every
    /// variable, drops every pending call and fires `on_disconnect`.
    pub(crate) fn mark_disconnected(&self) {
        let previous = self.set_state(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            self.end_session();
        }
    }

    fn end_session(&self) {
        self.forget_values();
        let dropped = self.pending.clear();
        info!(scheme = self.scheme.id(), role = %self.role(), dropped, "disconnected");
        for observer in self.observers() {
            observer.on_disconnect();
        }
    }

    /// Unsets every variable, the fallback included.
    pub(crate) fn forget_values(&self) {
        for variable in self.variables.iter().chain(std::iter::once(&self.fallback)) {
            let _order = variable.order_guard();
            variable.unset();
        }
    }

    /// Waits until the state is `wanted` or `timeout` elapses.
    pub fn wait_for_state(&self, wanted: ConnectionState, timeout: Duration) -> bool {
        let guard = lock(&self.state);
        let (guard, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |state| *state != wanted)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == wanted
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
