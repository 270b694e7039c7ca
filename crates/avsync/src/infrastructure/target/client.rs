//! The client role: keeps a local mirror of a device's variables.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use avsync_core::{Scheme, TargetUri};
use tracing::{debug, info};

use crate::application::lock;
use crate::application::target::{ConnectionError, ConnectionState, TargetConfig, TargetCore, TargetError};
use crate::infrastructure::network::endpoint::Endpoint;
use crate::infrastructure::network::reactor::{self, Control, ReactorHandle};
use crate::infrastructure::target::Target;

/// A connection to one device.
///
/// After [`Target::enter`] the reactor connects on its own and keeps
/// reconnecting every `reconnect_interval` until [`Target::exit`].  Use
/// [`Client::connect`] to wait for the first attempt.
pub struct Client {
    core: Arc<TargetCore>,
    uri: TargetUri,
    endpoint: Endpoint,
    /// Entered and exited together with this client.
    owns_server: bool,
    reactor: Mutex<Option<ReactorHandle>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uri", &self.uri)
            .field("endpoint", &self.endpoint)
            .field("state", &self.core.state())
            .finish()
    }
}

impl Client {
    pub fn new(scheme: Arc<Scheme>, uri: TargetUri, endpoint: Endpoint, config: TargetConfig) -> Self {
        Self {
            core: TargetCore::client(scheme, config),
            uri,
            endpoint,
            owns_server: false,
            reactor: Mutex::new(None),
        }
    }

    /// A client whose in-process server lives and dies with it.
    pub(crate) fn emulated(
        scheme: Arc<Scheme>,
        uri: TargetUri,
        endpoint: Endpoint,
        config: TargetConfig,
    ) -> Self {
        Self {
            core: TargetCore::client(scheme, config),
            uri,
            endpoint,
            owns_server: true,
            reactor: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Enters if needed and connects now, returning once the attempt is
    /// over.
    ///
    /// # Errors
    ///
    /// The reason the attempt failed.  The reactor keeps retrying in the
    /// background regardless.
    pub fn connect(&self) -> Result<(), TargetError> {
        self.enter()?;
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let reactor = lock(&self.reactor);
            let handle = reactor.as_ref().ok_or(ConnectionError::ReactorStopped)?;
            handle.send(Control::Connect(tx))?;
        }
        let limit = self.core.config().connect_timeout + Duration::from_secs(1);
        match rx.recv_timeout(limit) {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::TimedOut {
                addr: self.endpoint.to_string(),
                after: limit,
            }
            .into()),
        }
    }

    /// Blocks until connected or `timeout` elapses.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.core.wait_for_state(ConnectionState::Connected, timeout)
    }
}

impl Target for Client {
    fn core(&self) -> &Arc<TargetCore> {
        &self.core
    }

    fn uri(&self) -> &TargetUri {
        &self.uri
    }

    fn enter(&self) -> Result<(), TargetError> {
        let mut reactor = lock(&self.reactor);
        if reactor.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        if let (true, Endpoint::InProcess(server)) = (self.owns_server, &self.endpoint) {
            server.enter()?;
        }
        info!(uri = %self.uri, endpoint = %self.endpoint, "starting client");
        *reactor = Some(reactor::spawn_client(Arc::clone(&self.core), self.endpoint.clone())?);
        Ok(())
    }

    fn exit(&self) {
        let handle = lock(&self.reactor).take();
        if let Some(handle) = handle {
            debug!(uri = %self.uri, "stopping client");
            handle.stop();
        }
        if let (true, Endpoint::InProcess(server)) = (self.owns_server, &self.endpoint) {
            server.exit();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.exit();
    }
}
