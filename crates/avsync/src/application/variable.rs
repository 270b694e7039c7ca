//! Live state of one synchronised variable.
//!
//! A [`SharedVariable`] pairs an immutable [`VariableDef`] with the cached
//! value, the last line written for it, and the deadline of its outstanding
//! poll.  Exactly one target owns each instance; definitions are shared.
//!
//! # Locking
//!
//! Two locks guard a variable:
//!
//! - `state` protects the cached value and bookkeeping.  It is held only for
//!   the duration of a read or an update, never across a callback.
//! - `order` serialises store-then-notify sequences, so observers see the
//!   values of one variable in the order they were produced.  There is no
//!   ordering across variables.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use avsync_core::{Value, VariableDef};
use thiserror::Error;

use crate::application::lock;

/// The variable has no known value yet.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("variable {0} has no value yet")]
pub struct NotAvailable(pub String);

/// What a [`SharedVariable::store`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    /// The value differs from the previous one (or there was none).
    pub changed: bool,
    /// The variable was unset before.
    pub first: bool,
}

#[derive(Debug, Default)]
struct VarState {
    value: Option<Value>,
    last_sent: Option<String>,
    poll_deadline: Option<Instant>,
}

/// One variable of a live target.
#[derive(Debug)]
pub struct SharedVariable {
    def: Arc<VariableDef>,
    state: Mutex<VarState>,
    order: Mutex<()>,
}

impl SharedVariable {
    pub fn new(def: Arc<VariableDef>) -> Self {
        Self {
            def,
            state: Mutex::new(VarState::default()),
            order: Mutex::new(()),
        }
    }

    pub fn def(&self) -> &VariableDef {
        &self.def
    }

    pub fn id(&self) -> &str {
        self.def.id()
    }

    /// The cached value, `None` while unset.
    pub fn value(&self) -> Option<Value> {
        lock(&self.state).value.clone()
    }

    /// The cached value.
    ///
    /// # Errors
    ///
    /// [`NotAvailable`] while the variable is unset.
    pub fn get(&self) -> Result<Value, NotAvailable> {
        self.value().ok_or_else(|| NotAvailable(self.id().to_string()))
    }

    pub fn is_set(&self) -> bool {
        lock(&self.state).value.is_some()
    }

    /// Stores `value` and settles any outstanding poll.
    pub(crate) fn store(&self, value: Value) -> StoreOutcome {
        let mut state = lock(&self.state);
        let first = state.value.is_none();
        let changed = state.value.as_ref() != Some(&value);
        state.value = Some(value);
        state.poll_deadline = None;
        StoreOutcome { changed, first }
    }

    /// Forgets the cached value.  The variable itself lives on.
    pub(crate) fn unset(&self) {
        let mut state = lock(&self.state);
        state.value = None;
        state.last_sent = None;
        state.poll_deadline = None;
    }

    /// Holds the notification order for this variable.
    pub(crate) fn order_guard(&self) -> MutexGuard<'_, ()> {
        lock(&self.order)
    }

    /// Arms a poll that expires at `deadline`.
    ///
    /// Returns `false` if a poll is already outstanding, in which case no
    /// new poll command should be sent.
    pub(crate) fn begin_poll(&self, now: Instant, deadline: Instant) -> bool {
        let mut state = lock(&self.state);
        match state.poll_deadline {
            Some(pending) if pending > now => false,
            _ => {
                state.poll_deadline = Some(deadline);
                true
            }
        }
    }

    /// Disarms an expired poll.  Returns `true` if one expired.
    pub(crate) fn expire_poll(&self, now: Instant) -> bool {
        let mut state = lock(&self.state);
        match state.poll_deadline {
            Some(deadline) if deadline <= now => {
                state.poll_deadline = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn poll_outstanding(&self) -> bool {
        lock(&self.state).poll_deadline.is_some()
    }

    /// Decides whether `line` setting `value` must go on the wire, and
    /// records it as sent if so.
    ///
    /// A write is redundant only when the same line was already sent and the
    /// cached value already equals `value`.
    pub(crate) fn claim_write(&self, line: &str, value: &Value) -> bool {
        let mut state = lock(&self.state);
        let redundant =
            state.last_sent.as_deref() == Some(line) && state.value.as_ref() == Some(value);
        if redundant {
            return false;
        }
        state.last_sent = Some(line.to_string());
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
