//! Maps scheme ids to schemes and builds targets from URIs.
//!
//! ```text
//! denon:192.168.1.40:23     ──new_client──► Client ─TCP──► device
//! emulate:denon             ──new_client──► Client ─pipe─► dummy Server
//! denon:0.0.0.0:2323        ──new_server──► Server (listening)
//! denon                     ──new_server──► Server (in-process only)
//! ```
//!
//! The registry also runs scheme identification for discovery: every
//! registered scheme is asked in registration order whether a response
//! describes one of its devices, and the first one to say yes wins.

use std::sync::Arc;

use avsync_core::{Scheme, SchemeError, SsdpResponse, TargetUri, UriError};
use thiserror::Error;
use tracing::debug;

use crate::application::backend::{DummyBackend, ServerBackend};
use crate::application::target::TargetConfig;
use crate::infrastructure::network::endpoint::Endpoint;
use crate::infrastructure::target::client::Client;
use crate::infrastructure::target::proxy::Proxy;
use crate::infrastructure::target::server::Server;
use crate::infrastructure::target::Target;
use crate::schemes;

/// URI scheme that selects an in-process dummy device.
pub const EMULATE: &str = "emulate";

const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";
const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown scheme {0:?}")]
    UnknownScheme(String),
    #[error("scheme id or alias {0:?} is already registered")]
    Duplicate(String),
    #[error("emulate: needs the scheme to emulate, e.g. emulate:denon")]
    MissingEmulatedScheme,
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
}

/// The set of known schemes.
#[derive(Debug, Default)]
pub struct SchemeRegistry {
    schemes: Vec<Arc<Scheme>>,
}

impl SchemeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in scheme.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for scheme in schemes::builtin()? {
            registry.register(scheme)?;
        }
        Ok(registry)
    }

    /// Adds `scheme`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Duplicate`] if its id or an alias is taken.
    pub fn register(&mut self, scheme: Arc<Scheme>) -> Result<(), RegistryError> {
        let names = std::iter::once(scheme.id()).chain(scheme.aliases().iter().map(String::as_str));
        for name in names {
            if name == EMULATE || self.schemes.iter().any(|s| s.answers_to(name)) {
                return Err(RegistryError::Duplicate(name.to_string()));
            }
        }
        debug!(scheme = scheme.id(), "registered scheme");
        self.schemes.push(scheme);
        Ok(())
    }

    /// Looks a scheme up by id or alias.
    pub fn get(&self, name: &str) -> Result<&Arc<Scheme>, RegistryError> {
        self.schemes
            .iter()
            .find(|s| s.answers_to(name))
            .ok_or_else(|| RegistryError::UnknownScheme(name.to_string()))
    }

    /// Registered schemes in registration order.
    pub fn schemes(&self) -> &[Arc<Scheme>] {
        &self.schemes
    }

    /// The first scheme recognising `response`, with the client URI it
    /// proposes.
    pub fn identify(&self, response: &SsdpResponse) -> Option<(&Arc<Scheme>, TargetUri)> {
        self.schemes
            .iter()
            .find_map(|scheme| scheme.identify(response).map(|uri| (scheme, uri)))
    }

    /// Builds a client for `uri` without entering it.
    ///
    /// `<scheme>:<host>:<port>` connects over TCP (port defaults to the
    /// scheme's); `emulate:<scheme>` gets a private in-process dummy server.
    pub fn new_client(&self, uri: &TargetUri, config: TargetConfig) -> Result<Client, RegistryError> {
        if uri.scheme() == EMULATE {
            let name = uri.arg(0).ok_or(RegistryError::MissingEmulatedScheme)?;
            let scheme = Arc::clone(self.get(name)?);
            let server_uri = TargetUri::new(scheme.id(), Vec::<String>::new());
            let server = Server::new(
                Arc::clone(&scheme),
                server_uri,
                None,
                config.clone(),
                Arc::new(DummyBackend),
            );
            let endpoint = Endpoint::InProcess(Arc::new(server));
            return Ok(Client::emulated(scheme, uri.clone(), endpoint, config));
        }

        let scheme = Arc::clone(self.get(uri.scheme())?);
        let (host, port) = uri.host_port(DEFAULT_CLIENT_HOST, scheme.default_port())?;
        Ok(Client::new(scheme, uri.clone(), Endpoint::tcp(host, port), config))
    }

    /// Builds a server for `uri` without entering it.
    ///
    /// `<scheme>:<listen_host>:<listen_port>` listens on TCP; a bare
    /// `<scheme>` serves in-process peers only.
    pub fn new_server(
        &self,
        uri: &TargetUri,
        config: TargetConfig,
        backend: Arc<dyn ServerBackend>,
    ) -> Result<Server, RegistryError> {
        let scheme = Arc::clone(self.get(uri.scheme())?);
        let listen = if uri.args().is_empty() {
            None
        } else {
            Some(uri.host_port(DEFAULT_LISTEN_HOST, scheme.default_port())?)
        };
        Ok(Server::new(scheme, uri.clone(), listen, config, backend))
    }

    /// A server answering every poll with dummy values.
    pub fn new_dummy_server(&self, uri: &TargetUri, config: TargetConfig) -> Result<Server, RegistryError> {
        self.new_server(uri, config, Arc::new(DummyBackend))
    }

    /// A server at `listen` republishing the device at `upstream`.
    pub fn new_proxy(
        &self,
        upstream: &TargetUri,
        listen: &TargetUri,
        config: TargetConfig,
    ) -> Result<Proxy, RegistryError> {
        let client = Arc::new(self.new_client(upstream, config.clone())?);
        let scheme = client.core().scheme();
        if !scheme.answers_to(listen.scheme()) {
            return Err(RegistryError::UnknownScheme(listen.scheme().to_string()));
        }
        let addr = if listen.args().is_empty() {
            None
        } else {
            Some(listen.host_port(DEFAULT_LISTEN_HOST, scheme.default_port())?)
        };
        Ok(Proxy::new(client, listen.clone(), addr, config))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
