//! SSDP-based device discovery.
//!
//! Two halves live here:
//!
//! - [`discover`] sends one `M-SEARCH` to the multicast group, collects
//!   answers until the timeout, and asks the [`SchemeRegistry`] which scheme
//!   (if any) each answer describes.  First match wins.
//! - [`start_discovery_responder`] answers `M-SEARCH` queries on behalf of a
//!   local server, so an emulated device can be found like a real one.
//!
//! Discovery only proposes URIs.  A URI given by the user always wins.
//!
//! # How SSDP works (for beginners)
//!
//! SSDP (Simple Service Discovery Protocol, part of UPnP) is HTTP-shaped
//! text over UDP:
//!
//! 1. The searcher sends an `M-SEARCH * HTTP/1.1` datagram to the multicast
//!    group `239.255.255.250:1900`.  Every UPnP device on the LAN receives it.
//!
//! 2. Each device whose type matches the `ST` (search target) header answers
//!    with a unicast `HTTP/1.1 200 OK` datagram carrying `SERVER`, `ST`,
//!    `USN` and usually `LOCATION` headers.
//!
//! 3. The searcher keeps listening for `MX` seconds, since answers arrive
//!    with a random delay.
//!
//! # Read timeout
//!
//! Both halves use blocking sockets with a read timeout.  The responder
//! checks its `running` flag after every timeout and exits cleanly once it is
//! cleared.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use avsync_core::protocol::ssdp::{search_request, SSDP_MULTICAST_ADDR};
use avsync_core::{Scheme, SsdpResponse, SsdpSearch, TargetUri};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::infrastructure::registry::SchemeRegistry;

/// Extra response header carrying the TCP port of an avsync server.
pub const PORT_HEADER: &str = "X-AVSYNC-PORT";

const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The search could not be sent.
    #[error("failed to send search to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred while receiving a datagram.
    #[error("recv error: {0}")]
    Recv(#[source] io::Error),
    /// The responder thread could not be started.
    #[error("failed to start discovery thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Where and how long to search.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    /// Destination of the search; the SSDP group unless testing.
    pub multicast_addr: SocketAddr,
    pub timeout: Duration,
    pub search_target: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            multicast_addr: SocketAddr::from((SSDP_GROUP, 1900)),
            timeout: Duration::from_millis(2000),
            search_target: "ssdp:all".to_string(),
        }
    }
}

/// A device some scheme recognised.
#[derive(Debug, Clone)]
pub struct Discovered {
    /// Client URI for the device.
    pub uri: TargetUri,
    /// Id of the scheme that recognised it.
    pub scheme: String,
    pub response: SsdpResponse,
}

/// Searches the LAN and returns every recognised device, once each.
///
/// # Errors
///
/// Returns [`DiscoveryError`] when the socket cannot be bound, the search
/// cannot be sent, or receiving fails for a reason other than the timeout.
pub fn discover(
    settings: &DiscoverySettings,
    registry: &SchemeRegistry,
) -> Result<Vec<Discovered>, DiscoveryError> {
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let socket = UdpSocket::bind(bind).map_err(|source| DiscoveryError::BindFailed { addr: bind, source })?;

    let mx = settings.timeout.as_secs().clamp(1, 5) as u32;
    let request = search_request(&settings.search_target, mx);
    socket
        .send_to(request.as_bytes(), settings.multicast_addr)
        .map_err(|source| DiscoveryError::Send {
            addr: settings.multicast_addr,
            source,
        })?;
    debug!(to = %settings.multicast_addr, st = %settings.search_target, "sent M-SEARCH");

    let deadline = Instant::now() + settings.timeout;
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining)).map_err(DiscoveryError::Recv)?;
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => break,
            Err(e) => return Err(DiscoveryError::Recv(e)),
        };

        let response = match SsdpResponse::from_datagram(&buf[..len], src) {
            Ok(response) => response,
            Err(e) => {
                trace!("ignoring datagram from {src}: {e}");
                continue;
            }
        };
        match registry.identify(&response) {
            Some((scheme, uri)) => {
                if seen.insert(uri.to_string()) {
                    info!(%uri, "discovered {} device", scheme.id());
                    found.push(Discovered {
                        uri,
                        scheme: scheme.id().to_string(),
                        response,
                    });
                }
            }
            None => debug!(server = response.server().unwrap_or("?"), "unrecognised device at {src}"),
        }
    }

    Ok(found)
}

/// What a responder advertises.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub server: String,
    pub search_target: String,
    pub usn: String,
    pub location: Option<String>,
    /// TCP port of the advertised server.
    pub port: u16,
}

impl Advertisement {
    /// Advertises a server of `scheme` listening on `port`.
    ///
    /// The scheme's description goes into `SERVER`, which is what vendor
    /// identification usually keys on.
    pub fn for_scheme(scheme: &Scheme, port: u16) -> Self {
        let search_target = format!("urn:avsync:device:{}:1", scheme.id());
        Self {
            server: format!(
                "avsync/{} UPnP/1.0 {}",
                env!("CARGO_PKG_VERSION"),
                scheme.description()
            ),
            usn: format!("uuid:{}::{search_target}", Uuid::new_v4()),
            search_target,
            location: None,
            port,
        }
    }

    fn response(&self) -> SsdpResponse {
        let mut response = SsdpResponse::new()
            .header("SERVER", &self.server)
            .header("ST", &self.search_target)
            .header("USN", &self.usn);
        if let Some(location) = &self.location {
            response = response.header("LOCATION", location);
        }
        response.header(PORT_HEADER, self.port.to_string())
    }
}

/// A running responder.  Stops when dropped.
#[derive(Debug)]
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DiscoveryResponder {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Clears the running flag and waits for the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("discovery responder panicked");
            }
        }
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds `bind` and answers matching `M-SEARCH` queries on a background
/// thread until `running` is cleared.
///
/// When bound to the SSDP port the socket also joins the multicast group;
/// failing to join is logged, not fatal.
///
/// # Errors
///
/// [`DiscoveryError::BindFailed`] if the socket cannot be bound.
pub fn start_discovery_responder(
    bind: SocketAddr,
    advertisement: Advertisement,
    running: Arc<AtomicBool>,
) -> Result<DiscoveryResponder, DiscoveryError> {
    let socket =
        UdpSocket::bind(bind).map_err(|source| DiscoveryError::BindFailed { addr: bind, source })?;
    let local_addr = socket
        .local_addr()
        .map_err(|source| DiscoveryError::BindFailed { addr: bind, source })?;
    if bind.port() == 1900 {
        if let Err(e) = socket.join_multicast_v4(&SSDP_GROUP, &Ipv4Addr::UNSPECIFIED) {
            warn!("could not join {SSDP_MULTICAST_ADDR}: {e}");
        }
    }
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .ok();

    let thread_running = Arc::clone(&running);
    let thread = std::thread::Builder::new()
        .name("avsync-discovery".to_string())
        .spawn(move || responder_loop(socket, advertisement, thread_running))
        .map_err(DiscoveryError::Spawn)?;

    info!("discovery responder listening on UDP {local_addr}");
    Ok(DiscoveryResponder {
        local_addr,
        running,
        thread: Some(thread),
    })
}

/// The receive loop executed on the responder thread.
fn responder_loop(socket: UdpSocket, advertisement: Advertisement, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 4096];
    let reply = advertisement.response().render();

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            trace!("ignoring binary datagram from {src}");
            continue;
        };
        match SsdpSearch::parse(text) {
            Ok(search) if search.wants(&advertisement.search_target) => {
                debug!("answering M-SEARCH from {src} (ST {})", search.search_target());
                if let Err(e) = socket.send_to(reply.as_bytes(), src) {
                    warn!("failed to answer {src}: {e}");
                }
            }
            Ok(search) => trace!("not answering ST {} from {src}", search.search_target()),
            Err(e) => trace!("ignoring datagram from {src}: {e}"),
        }
    }

    info!("discovery responder stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
