//! Where a client connects to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::application::target::ConnectionError;
use crate::infrastructure::network::reactor::BoxedIo;
use crate::infrastructure::target::server::Server;
use crate::infrastructure::target::Target;

/// Size of each direction of an in-process pipe.
const IN_PROCESS_BUFFER: usize = 64 * 1024;

/// The far end of a client's connection.
#[derive(Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    /// A server in the same process, reached over an in-memory pipe.
    InProcess(Arc<Server>),
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::InProcess(server) => write!(f, "in-process {}", server.core().scheme().id()),
        }
    }
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Opens a fresh byte stream to the endpoint.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::ConnectFailed`] if the TCP connect fails.
    /// - [`ConnectionError::TimedOut`] if it takes longer than `limit`.
    /// - [`ConnectionError::ServerNotRunning`] for an in-process server that
    ///   has not been entered.
    pub(crate) async fn connect(&self, limit: Duration) -> Result<BoxedIo, ConnectionError> {
        match self {
            Endpoint::Tcp { host, port } => {
                let addr = format!("{host}:{port}");
                let stream = match timeout(limit, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(source)) => return Err(ConnectionError::ConnectFailed { addr, source }),
                    Err(_) => return Err(ConnectionError::TimedOut { addr, after: limit }),
                };
                // Commands are tiny; do not let Nagle hold them back.
                let _ = stream.set_nodelay(true);
                Ok(Box::new(stream))
            }
            Endpoint::InProcess(server) => {
                let (ours, theirs) = tokio::io::duplex(IN_PROCESS_BUFFER);
                server.attach(Box::new(theirs))?;
                Ok(Box::new(ours))
            }
        }
    }
}
