//! A server that republishes an upstream device.
//!
//! ```text
//!   peers ──► Server ──ProxyBackend──► Client ──► device
//!   peers ◄── Server ◄──Mirror──────── Client ◄── device
//! ```
//!
//! Writes from peers are forwarded to the device; whatever the device reports
//! is stored on the server and so rebroadcast to every peer.  Lines the
//! device sends that no variable recognises are passed through verbatim.

use std::sync::{Arc, Weak};

use avsync_core::{Scheme, TargetUri, Value, FALLBACK_ID};
use tracing::{debug, warn};

use crate::application::backend::{Responder, ServerBackend};
use crate::application::observer::TargetObserver;
use crate::application::pending::Resolved;
use crate::application::target::{TargetConfig, TargetCore, TargetError};
use crate::application::variable::SharedVariable;
use crate::infrastructure::target::client::Client;
use crate::infrastructure::target::server::Server;
use crate::infrastructure::target::Target;

/// Answers a server's polls and writes from an upstream client.
pub struct ProxyBackend {
    upstream: Weak<TargetCore>,
}

impl ProxyBackend {
    pub fn new(upstream: &Arc<TargetCore>) -> Self {
        Self {
            upstream: Arc::downgrade(upstream),
        }
    }
}

impl ServerBackend for ProxyBackend {
    fn poll(&self, variable: &SharedVariable, responder: Responder) {
        let Some(upstream) = self.upstream.upgrade() else {
            return;
        };
        let id = variable.id().to_string();
        let timeout = upstream.config().get_timeout;
        let scheduled = upstream.schedule(&[id.as_str()], Some(timeout), move |resolved: &Resolved| {
            // Normally the mirror has stored it already.
            if responder.variable().is_set() {
                return;
            }
            if let Some(value) = resolved.get(responder.variable().id()) {
                if let Err(e) = responder.set(value.clone()) {
                    debug!(variable = responder.variable().id(), error = %e, "upstream value rejected");
                }
            }
        });
        if let Err(e) = scheduled {
            debug!(variable = %id, error = %e, "cannot ask upstream");
        }
    }

    fn write(&self, variable: &SharedVariable, value: Value, _responder: Responder) {
        let Some(upstream) = self.upstream.upgrade() else {
            return;
        };
        if let Err(e) = upstream.set(variable.id(), value) {
            warn!(variable = variable.id(), error = %e, "cannot forward write upstream");
        }
    }

    fn unrecognized(&self, line: &str) {
        let Some(upstream) = self.upstream.upgrade() else {
            return;
        };
        if let Err(e) = upstream.send_line(line) {
            debug!(%line, error = %e, "cannot forward line upstream");
        }
    }
}

/// Copies upstream values onto the server.
struct Mirror {
    server: Weak<TargetCore>,
}

impl TargetObserver for Mirror {
    fn on_disconnect(&self) {
        if let Some(server) = self.server.upgrade() {
            server.forget_values();
        }
    }

    fn on_set(&self, variable: &SharedVariable, value: &Value) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        if variable.id() == FALLBACK_ID {
            if let Value::Text(line) = value {
                let _ = server.send_line(line);
            }
            return;
        }
        if let Ok(mirrored) = server.variable(variable.id()) {
            server.store(mirrored, value.clone());
        }
    }
}

/// A server fed by an upstream client, entered and exited as one.
pub struct Proxy {
    server: Server,
    upstream: Arc<Client>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("server", &self.server)
            .field("upstream", &self.upstream)
            .finish()
    }
}

impl Proxy {
    /// Republishes `upstream` under `uri`, listening on `listen` if given.
    pub fn new(
        upstream: Arc<Client>,
        uri: TargetUri,
        listen: Option<(String, u16)>,
        config: TargetConfig,
    ) -> Self {
        let scheme: Arc<Scheme> = Arc::clone(upstream.core().scheme());
        let backend = Arc::new(ProxyBackend::new(upstream.core()));
        let server = Server::new(scheme, uri, listen, config, backend);
        upstream.bind(Arc::new(Mirror {
            server: Arc::downgrade(server.core()),
        }));
        Self { server, upstream }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn upstream(&self) -> &Arc<Client> {
        &self.upstream
    }
}

impl Target for Proxy {
    fn core(&self) -> &Arc<TargetCore> {
        self.server.core()
    }

    fn uri(&self) -> &TargetUri {
        self.server.uri()
    }

    fn enter(&self) -> Result<(), TargetError> {
        self.upstream.enter()?;
        self.server.enter()
    }

    fn exit(&self) {
        self.server.exit();
        self.upstream.exit();
    }
}
