//! Schemes that ship with the runtime.
//!
//! Device catalogs are plain data built with [`avsync_core::Scheme::builder`];
//! anything registered here is available to the registry out of the box.

use std::sync::Arc;

use avsync_core::{Scheme, SchemeError};

pub mod denon;

/// Every built-in scheme.
///
/// # Errors
///
/// A [`SchemeError`] if a catalog is inconsistent, which the tests rule out.
pub fn builtin() -> Result<Vec<Arc<Scheme>>, SchemeError> {
    Ok(vec![denon::scheme()?])
}
