//! Pending calls: callbacks deferred until their variables are known.
//!
//! A pending call waits for every variable it requires to hold a value.
//! After each store of any variable the owning target asks this list for
//! calls that became ready; each ready call is removed under the list's lock,
//! so its callback runs exactly once.  A call whose deadline passes is removed
//! by the periodic sweep, or by the first resolve that finds it expired, and
//! its callback is dropped without being invoked.
//!
//! ```text
//! schedule(["power", "volume"])
//!   ├─ both known      ──► invoke now, on the caller's thread
//!   └─ volume missing  ──► register, poll volume
//!                             ├─ MV49 arrives  ──► invoke once, deregister
//!                             └─ deadline      ──► drop, never invoked
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use avsync_core::Value;

use crate::application::lock;
use crate::application::variable::SharedVariable;

/// Identifies a registered pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// The values of a call's required variables at the moment it became ready.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    values: Vec<(String, Value)>,
}

impl Resolved {
    /// Snapshots `vars`.  Returns `None` if any of them is unset.
    pub(crate) fn snapshot(vars: &[Arc<SharedVariable>]) -> Option<Self> {
        let values = vars
            .iter()
            .map(|v| v.value().map(|value| (v.id().to_string(), value)))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { values })
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A deferred callback.
pub type Callback = Box<dyn FnOnce(&Resolved) + Send + 'static>;

struct PendingCall {
    id: CallId,
    requires: Vec<Arc<SharedVariable>>,
    deadline: Option<Instant>,
    callback: Callback,
}

/// A call that became ready and must now be invoked, outside any lock.
pub(crate) struct ReadyCall {
    callback: Callback,
    resolved: Resolved,
}

impl ReadyCall {
    pub(crate) fn new(callback: Callback, resolved: Resolved) -> Self {
        Self { callback, resolved }
    }

    pub(crate) fn invoke(self) {
        (self.callback)(&self.resolved);
    }
}

/// The ordered list of a target's pending calls.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<Vec<PendingCall>>,
    next_id: AtomicU64,
}

impl fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCalls")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        requires: Vec<Arc<SharedVariable>>,
        deadline: Option<Instant>,
        callback: Callback,
    ) -> CallId {
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.calls).push(PendingCall {
            id,
            requires,
            deadline,
            callback,
        });
        id
    }

    /// Removes and returns the calls that wait on `variable` and whose
    /// requirements are now all met.
    pub(crate) fn resolve(&self, variable: &str) -> Vec<ReadyCall> {
        self.resolve_at(variable, Instant::now())
    }

    pub(crate) fn resolve_at(&self, variable: &str, now: Instant) -> Vec<ReadyCall> {
        self.take_ready(now, |call| call.requires.iter().any(|v| v.id() == variable))
    }

    /// Removes call `id` if its requirements are already met.
    pub(crate) fn resolve_call(&self, id: CallId) -> Option<ReadyCall> {
        self.take_ready(Instant::now(), |call| call.id == id).pop()
    }

    /// A candidate whose deadline is at or before `now` is removed without
    /// being returned, even when its requirements are met.
    fn take_ready(
        &self,
        now: Instant,
        mut candidate: impl FnMut(&PendingCall) -> bool,
    ) -> Vec<ReadyCall> {
        let mut calls = lock(&self.calls);
        let mut ready = Vec::new();
        let mut i = 0;
        while i < calls.len() {
            if !candidate(&calls[i]) {
                i += 1;
                continue;
            }
            if calls[i].deadline.is_some_and(|d| d <= now) {
                calls.remove(i);
                continue;
            }
            match Resolved::snapshot(&calls[i].requires) {
                Some(resolved) => {
                    let call = calls.remove(i);
                    ready.push(ReadyCall::new(call.callback, resolved));
                }
                None => i += 1,
            }
        }
        ready
    }

    /// Drops every call whose deadline is at or before `now`.  Returns how
    /// many were dropped.
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let mut calls = lock(&self.calls);
        let before = calls.len();
        calls.retain(|call| call.deadline.map_or(true, |d| d > now));
        before - calls.len()
    }

    /// Drops call `id` without invoking it.
    pub fn cancel(&self, id: CallId) -> bool {
        let mut calls = lock(&self.calls);
        let before = calls.len();
        calls.retain(|call| call.id != id);
        calls.len() != before
    }

    /// Drops every call.
    pub(crate) fn clear(&self) -> usize {
        let mut calls = lock(&self.calls);
        let dropped = calls.len();
        calls.clear();
        dropped
    }

    pub fn contains(&self, id: CallId) -> bool {
        lock(&self.calls).iter().any(|call| call.id == id)
    }

    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variables some pending call still waits for, each listed once.
    pub(crate) fn missing(&self) -> Vec<Arc<SharedVariable>> {
        let calls = lock(&self.calls);
        let mut missing: Vec<Arc<SharedVariable>> = Vec::new();
        for var in calls.iter().flat_map(|c| c.requires.iter()) {
            if !var.is_set() && !missing.iter().any(|m| Arc::ptr_eq(m, var)) {
                missing.push(Arc::clone(var));
            }
        }
        missing
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
