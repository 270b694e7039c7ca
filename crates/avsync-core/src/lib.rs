//! # avsync-core
//!
//! Shared building blocks for keeping a controller in sync with a
//! line-oriented AV receiver: typed values, variable catalogs, the codecs that
//! map variables to wire lines, line framing, target URIs and SSDP messages.
//!
//! This crate is used by both client and server roles.  It opens no sockets
//! and starts no threads.
//!
//! # Architecture overview (for beginners)
//!
//! An AV receiver exposes its state as short ASCII commands: `PWON` means the
//! power is on, `MV495` means the master volume is 49.5, and `PW?` asks for the
//! current power state.  A **scheme** describes one such protocol as a list of
//! **variables**.  Each variable knows:
//!
//! - which lines belong to it (`PW...`),
//! - how to turn such a line into a typed [`Value`] and back,
//! - which values are legal (its [`Domain`]),
//! - how to ask the device for the current value (its poll command).
//!
//! The runtime crate (`avsync`) keeps one live cached value per variable and
//! moves lines over TCP or in-process pipes.  It relies on this crate for
//! everything protocol-specific.
//!
//! - **`domain`**: values, domains, variable definitions, schemes.
//! - **`protocol`**: framing, codecs, URIs, discovery messages.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `avsync_core::Scheme` instead of `avsync_core::domain::scheme::Scheme`.
pub use domain::scheme::{Identify, Scheme, SchemeBuilder, SchemeError, FALLBACK_ID};
pub use domain::value::{Domain, DomainError, Value};
pub use domain::variable::{VariableBuilder, VariableDef};
pub use protocol::codec::{
    DecodeError, EncodeError, FallbackCodec, LineFormat, PrefixCodec, VariableCodec,
};
pub use protocol::framing::LineCodec;
pub use protocol::ssdp::{SsdpError, SsdpResponse, SsdpSearch};
pub use protocol::uri::{TargetUri, UriError};
