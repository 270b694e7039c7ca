//! Live targets: a [`TargetCore`] plus the reactor that moves its lines.
//!
//! - **`client`** – connects to a device (TCP or an in-process server).
//! - **`server`** – publishes a scheme's variables to any number of peers.
//! - **`proxy`**  – a server whose values come from an upstream client.
//!
//! Every target has the same lifecycle: construct, [`Target::enter`] to start
//! its reactor thread, use it, [`Target::exit`] to stop.  Dropping a target
//! exits it.

use std::sync::Arc;
use std::time::Duration;

use avsync_core::{TargetUri, Value};

use crate::application::observer::TargetObserver;
use crate::application::pending::{CallId, Resolved};
use crate::application::target::{ConnectionState, TargetCore, TargetError};
use crate::application::variable::SharedVariable;

pub mod client;
pub mod proxy;
pub mod server;

/// Operations common to clients, servers and proxies.
///
/// Implementors provide the lifecycle; everything else delegates to the
/// [`TargetCore`].
pub trait Target: Send + Sync {
    fn core(&self) -> &Arc<TargetCore>;

    fn uri(&self) -> &TargetUri;

    /// Starts the reactor.  Calling it on a running target does nothing.
    fn enter(&self) -> Result<(), TargetError>;

    /// Stops the reactor.  All variables become unset.
    fn exit(&self);

    fn state(&self) -> ConnectionState {
        self.core().state()
    }

    fn is_connected(&self) -> bool {
        self.core().is_connected()
    }

    fn variable(&self, id: &str) -> Result<&Arc<SharedVariable>, TargetError> {
        self.core().variable(id)
    }

    /// The cached value, without waiting.
    fn value(&self, id: &str) -> Result<Value, TargetError> {
        self.core().value(id)
    }

    /// The value, waiting for it if necessary.  Must not be called from an
    /// observer.
    fn get(&self, id: &str) -> Result<Value, TargetError> {
        self.core().get(id)
    }

    fn set(&self, id: &str, value: Value) -> Result<(), TargetError> {
        self.core().set(id, value)
    }

    fn force_set(&self, id: &str, value: Value) -> Result<(), TargetError> {
        self.core().force_set(id, value)
    }

    fn poll(&self, id: &str) -> Result<(), TargetError> {
        self.core().poll(id)
    }

    fn schedule<F>(
        &self,
        requires: &[&str],
        timeout: Option<Duration>,
        f: F,
    ) -> Result<Option<CallId>, TargetError>
    where
        Self: Sized,
        F: FnOnce(&Resolved) + Send + 'static,
    {
        self.core().schedule(requires, timeout, f)
    }

    fn cancel(&self, call: CallId) -> bool {
        self.core().cancel(call)
    }

    fn bind(&self, observer: Arc<dyn TargetObserver>) {
        self.core().bind(observer);
    }
}
