//! Network infrastructure.
//!
//! # Sub-modules
//!
//! - **`reactor`** – The per-target I/O thread: one single-threaded Tokio
//!   runtime that owns the target's sockets, frames lines and drives the idle
//!   tick (pending-call expiry, poll timers, reconnects).
//!
//! - **`endpoint`** – Where a client connects to: a TCP address or an
//!   in-process server reached through an in-memory pipe.
//!
//! - **`discovery`** – SSDP search and responder.  Finds devices on the LAN
//!   and lets local servers be found the same way.

pub mod discovery;
pub mod endpoint;
pub mod reactor;
