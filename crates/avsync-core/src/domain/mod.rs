//! Protocol-independent description of synchronised state.
//!
//! Nothing in here touches sockets or threads.  The runtime crate turns these
//! immutable descriptions into live variables owned by a target.
//!
//! - [`value`]: the [`Value`](value::Value) type and the
//!   [`Domain`](value::Domain) of legal values.
//! - [`variable`]: one variable's metadata and codec.
//! - [`scheme`]: a frozen catalog of variables plus connection defaults.

pub mod scheme;
pub mod value;
pub mod variable;
