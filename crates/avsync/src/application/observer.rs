//! The fixed set of events a target reports to front-ends.
//!
//! Observers are appended with `bind` and never replace each other.  They are
//! called on whichever thread produced the event, usually the reactor thread,
//! and must return quickly.  An observer may call `set`, `schedule` or `poll`
//! on the target, but must not store into the variable it is being notified
//! about from inside `on_change`/`on_set`, and must not use the blocking `get`.

use avsync_core::Value;

use crate::application::variable::SharedVariable;

/// Receives connection and variable events from a target.
///
/// Every method has an empty default so implementors pick what they need.
#[cfg_attr(test, mockall::automock)]
pub trait TargetObserver: Send + Sync {
    /// The target reached the connected state.
    fn on_connect(&self) {}

    /// The target left the connected state.  All variables are unset and
    /// all pending calls are dropped by the time this runs.
    fn on_disconnect(&self) {}

    /// `variable` now holds a value different from before.
    fn on_change(&self, variable: &SharedVariable, value: &Value) {
        let _ = (variable, value);
    }

    /// `variable` was stored, whether or not the value changed.
    fn on_set(&self, variable: &SharedVariable, value: &Value) {
        let _ = (variable, value);
    }
}
