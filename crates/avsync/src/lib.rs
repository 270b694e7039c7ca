//! # avsync
//!
//! Keeps a controller process in sync with a line-oriented AV receiver.
//!
//! A [`Client`] mirrors a device's variables: it connects (and keeps
//! reconnecting), polls what it needs, decodes every line the device pushes
//! and tells observers what changed.  A [`Server`] plays the device side for
//! peers, answering from a [`ServerBackend`]: the [`DummyBackend`] for tests
//! and emulation, or a [`ProxyBackend`] to share one real device between
//! several front-ends.
//!
//! ```no_run
//! use std::time::Duration;
//! use avsync::{Resolved, SchemeRegistry, Target, TargetConfig, TargetUri};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemeRegistry::with_builtin()?;
//! let uri = TargetUri::parse("emulate:denon")?;
//! let client = registry.new_client(&uri, TargetConfig::default())?;
//! client.enter()?;
//!
//! client.schedule(&["power", "volume"], Some(Duration::from_secs(5)), |values: &Resolved| {
//!     for (id, value) in values.iter() {
//!         println!("{id} = {value}");
//!     }
//! })?;
//! println!("volume is {}", client.get("volume")?);
//! client.exit();
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! - **`application`**: variable state, pending calls and the target state
//!   machine.  No sockets, no threads.
//! - **`infrastructure`**: the reactor threads, clients, servers, the scheme
//!   registry, discovery and configuration.
//! - **`schemes`**: built-in device catalogs.

pub mod application;
pub mod infrastructure;
pub mod schemes;

pub use application::backend::{DummyBackend, Responder, ServerBackend};
pub use application::observer::TargetObserver;
pub use application::pending::{CallId, Resolved};
pub use application::target::{
    ConnectionError, ConnectionState, Outbound, PeerId, Role, TargetConfig, TargetCore,
    TargetError,
};
pub use application::variable::{NotAvailable, SharedVariable};
pub use infrastructure::network::discovery::{
    discover, start_discovery_responder, Advertisement, Discovered, DiscoveryError,
    DiscoveryResponder, DiscoverySettings,
};
pub use infrastructure::network::endpoint::Endpoint;
pub use infrastructure::registry::{RegistryError, SchemeRegistry};
pub use infrastructure::target::client::Client;
pub use infrastructure::target::proxy::{Proxy, ProxyBackend};
pub use infrastructure::target::server::Server;
pub use infrastructure::target::Target;

pub use avsync_core::{Domain, DomainError, Scheme, TargetUri, Value, FALLBACK_ID};
