//! The server role: publishes a scheme's variables to peers.
//!
//! A server is the authority for its values.  Peers send the same lines they
//! would send to a real device; the server answers polls, hands writes to its
//! [`ServerBackend`], and rebroadcasts every stored value to all peers.
//!
//! Peers arrive over TCP (when the server listens) or over in-process pipes
//! attached by clients built with [`Endpoint::InProcess`].
//!
//! [`Endpoint::InProcess`]: crate::infrastructure::network::endpoint::Endpoint::InProcess

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use avsync_core::{Scheme, TargetUri};
use tracing::{debug, info};

use crate::application::backend::ServerBackend;
use crate::application::lock;
use crate::application::target::{ConnectionError, TargetConfig, TargetCore, TargetError};
use crate::infrastructure::network::reactor::{self, BoxedIo, Control, ReactorHandle};
use crate::infrastructure::target::Target;

pub struct Server {
    core: Arc<TargetCore>,
    uri: TargetUri,
    listen: Option<(String, u16)>,
    reactor: Mutex<Option<ReactorHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("uri", &self.uri)
            .field("listen", &self.listen)
            .field("state", &self.core.state())
            .finish()
    }
}

impl Server {
    /// A server answering through `backend`.  With `listen` set it accepts
    /// TCP peers there; otherwise only in-process peers.
    pub fn new(
        scheme: Arc<Scheme>,
        uri: TargetUri,
        listen: Option<(String, u16)>,
        config: TargetConfig,
        backend: Arc<dyn ServerBackend>,
    ) -> Self {
        Self {
            core: TargetCore::server(scheme, config, backend),
            uri,
            listen,
            reactor: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// The bound TCP address once entered.  Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Serves `io` as one more peer.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::ServerNotRunning`] before [`Target::enter`].
    pub fn attach(&self, io: BoxedIo) -> Result<(), ConnectionError> {
        let reactor = lock(&self.reactor);
        match reactor.as_ref() {
            Some(handle) if !handle.is_finished() => handle.send(Control::Attach(io)),
            _ => Err(ConnectionError::ServerNotRunning(self.core.scheme().id().to_string())),
        }
    }

    /// Sends a raw line to every peer, bypassing the variables.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] before [`Target::enter`].
    pub fn broadcast(&self, line: &str) -> Result<(), ConnectionError> {
        self.core.send_line(line)
    }

    fn bind(&self) -> Result<Option<TcpListener>, TargetError> {
        let Some((host, port)) = &self.listen else {
            return Ok(None);
        };
        let addr = format!("{host}:{port}");
        let bind_error = |source| TargetError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(addr.as_str()).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        *lock(&self.local_addr) = listener.local_addr().ok();
        Ok(Some(listener))
    }
}

impl Target for Server {
    fn core(&self) -> &Arc<TargetCore> {
        &self.core
    }

    fn uri(&self) -> &TargetUri {
        &self.uri
    }

    /// Binds the listener (synchronously, so bind errors surface here),
    /// starts the reactor and enters `Connected`.
    fn enter(&self) -> Result<(), TargetError> {
        let mut reactor = lock(&self.reactor);
        if reactor.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let listener = self.bind()?;
        *reactor = Some(reactor::spawn_server(Arc::clone(&self.core), listener)?);
        drop(reactor);

        match self.local_addr() {
            Some(addr) => info!(uri = %self.uri, %addr, "server listening"),
            None => info!(uri = %self.uri, "server running in-process"),
        }
        self.core.mark_connected();
        Ok(())
    }

    fn exit(&self) {
        let handle = lock(&self.reactor).take();
        if let Some(handle) = handle {
            debug!(uri = %self.uri, "stopping server");
            handle.stop();
        }
        *lock(&self.local_addr) = None;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.exit();
    }
}
