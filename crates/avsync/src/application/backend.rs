//! Where a server gets its answers from.
//!
//! A server is the authority for its variables.  When a peer polls a variable
//! the server does not know yet, or asks to change one, the server delegates
//! to its [`ServerBackend`]: the [`DummyBackend`] fabricates values, a proxy
//! backend asks an upstream device.  Backends answer through a
//! [`Responder`], either synchronously or later from another thread.

use std::sync::{Arc, Weak};

use avsync_core::Value;
use tracing::debug;

use crate::application::target::{TargetCore, TargetError};
use crate::application::variable::SharedVariable;

/// Supplies the values a server publishes.
#[cfg_attr(test, mockall::automock)]
pub trait ServerBackend: Send + Sync {
    /// `variable` is unset and someone asked for it.  The backend must
    /// eventually call [`Responder::set`], or leave it unset if it cannot
    /// find out.
    fn poll(&self, variable: &SharedVariable, responder: Responder);

    /// A peer asked to change `variable` to `value`.
    fn write(&self, variable: &SharedVariable, value: Value, responder: Responder);

    /// A peer sent a line no variable recognised.
    fn unrecognized(&self, line: &str) {
        let _ = line;
    }
}

/// Handle through which a backend publishes one variable's value.
///
/// Holds only a weak reference to the server, so a backend keeping a
/// responder around does not keep a stopped server alive.
#[derive(Clone)]
pub struct Responder {
    core: Weak<TargetCore>,
    variable: Arc<SharedVariable>,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("variable", &self.variable.id())
            .finish()
    }
}

impl Responder {
    pub(crate) fn new(core: Weak<TargetCore>, variable: Arc<SharedVariable>) -> Self {
        Self { core, variable }
    }

    pub fn variable(&self) -> &SharedVariable {
        &self.variable
    }

    /// Publishes `value`: stores it on the server and rebroadcasts it.
    ///
    /// # Errors
    ///
    /// [`TargetError::Domain`] if `value` is outside the variable's domain.
    /// Returns `Ok` without effect once the server is gone.
    pub fn set(&self, value: impl Into<Value>) -> Result<(), TargetError> {
        match self.core.upgrade() {
            Some(core) => core.write_variable(&self.variable, value.into(), false),
            None => {
                debug!(variable = self.variable.id(), "server gone, dropping answer");
                Ok(())
            }
        }
    }
}

/// Answers every poll with the variable's dummy value and accepts every
/// in-domain write.  Never touches hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyBackend;

impl ServerBackend for DummyBackend {
    fn poll(&self, variable: &SharedVariable, responder: Responder) {
        let value = variable.def().dummy_value();
        debug!(variable = variable.id(), %value, "answering poll with dummy value");
        if let Err(e) = responder.set(value) {
            debug!(variable = variable.id(), error = %e, "dummy value rejected");
        }
    }

    fn write(&self, variable: &SharedVariable, value: Value, responder: Responder) {
        if let Err(e) = responder.set(value) {
            debug!(variable = variable.id(), error = %e, "write rejected");
        }
    }
}
