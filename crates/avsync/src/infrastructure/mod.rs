//! Infrastructure layer: threads, sockets and files.
//!
//! Contains the reactor that moves a target's lines, the client, server and
//! proxy facades that own reactors, the scheme registry, SSDP discovery and
//! configuration persistence.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `avsync_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod registry;
pub mod storage;
pub mod target;
