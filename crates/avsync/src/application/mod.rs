//! Application layer: the rules every target follows, independent of I/O.
//!
//! # What lives here? (for beginners)
//!
//! Everything in this layer can be driven from a unit test by feeding lines
//! in and reading [`target::Outbound`] messages out of a channel.  Sockets,
//! threads and the async runtime belong to `infrastructure`.
//!
//! # Sub-modules
//!
//! - **`variable`** – One live variable: cached value, outstanding poll,
//!   last line written.
//! - **`pending`**  – Callbacks deferred until their variables are known.
//! - **`target`**   – The connection state machine and the client and
//!   server rules for reading, writing and polling.
//! - **`observer`** – The events a target reports to front-ends.
//! - **`backend`**  – Where a server gets its answers from.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backend;
pub mod observer;
pub mod pending;
pub mod target;
pub mod variable;

/// Locks `mutex`, recovering the data if a panicking thread poisoned it.
///
/// None of the guarded state can be left half-updated by a panic, so the
/// poison flag carries no information here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
