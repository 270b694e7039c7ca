//! The subset of SSDP used for discovery.
//!
//! Only two messages are needed: the multicast `M-SEARCH` request and the
//! unicast `HTTP/1.1 200 OK` answer.  Both are HTTP-style header blocks sent
//! as single UDP datagrams:
//!
//! ```text
//! M-SEARCH * HTTP/1.1
//! HOST: 239.255.255.250:1900
//! MAN: "ssdp:discover"
//! MX: 1
//! ST: ssdp:all
//!
//! HTTP/1.1 200 OK
//! SERVER: avsync/0.1 Denon-Emulator
//! ST: urn:schemas-denon-com:device:ACT-Denon:1
//! USN: uuid:...
//! LOCATION: http://192.168.1.20:8080/description.xml
//! ```
//!
//! Header names are case-insensitive.  Nothing here opens sockets.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

/// Well-known SSDP multicast group and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SsdpError {
    #[error("datagram is not valid UTF-8")]
    NotText,
    #[error("unexpected start line {0:?}")]
    UnexpectedStartLine(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
}

/// Renders an `M-SEARCH` request for `search_target` (e.g. `ssdp:all`).
pub fn search_request(search_target: &str, mx_secs: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx_secs}\r\n\
         ST: {search_target}\r\n\
         \r\n"
    )
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>, SsdpError> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SsdpError::MalformedHeader(line.to_string()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// A parsed `M-SEARCH` request, as seen by a responder.
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpSearch {
    headers: Vec<(String, String)>,
}

impl SsdpSearch {
    /// Parses a datagram.
    ///
    /// # Errors
    ///
    /// [`SsdpError::UnexpectedStartLine`] for anything but an `M-SEARCH`.
    pub fn parse(datagram: &str) -> Result<Self, SsdpError> {
        let mut lines = datagram.split("\r\n").flat_map(|l| l.split('\n'));
        let start = lines.next().unwrap_or_default().trim();
        if !start.starts_with("M-SEARCH") {
            return Err(SsdpError::UnexpectedStartLine(start.to_string()));
        }
        Ok(Self {
            headers: parse_headers(lines)?,
        })
    }

    /// The `ST` header; `ssdp:all` when absent.
    pub fn search_target(&self) -> &str {
        find_header(&self.headers, "ST").unwrap_or("ssdp:all")
    }

    /// `true` if a device advertising `device_target` should answer.
    pub fn wants(&self, device_target: &str) -> bool {
        let st = self.search_target();
        st == "ssdp:all" || st == "upnp:rootdevice" || st == device_target
    }
}

/// A discovery answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpResponse {
    headers: Vec<(String, String)>,
    source: Option<SocketAddr>,
}

impl SsdpResponse {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            source: None,
        }
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Records the address the datagram came from.
    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    /// Parses a `200 OK` datagram.
    ///
    /// # Errors
    ///
    /// [`SsdpError::UnexpectedStartLine`] for anything but an HTTP 200
    /// answer, [`SsdpError::MalformedHeader`] for header lines without `:`.
    pub fn parse(datagram: &str) -> Result<Self, SsdpError> {
        let mut lines = datagram.split("\r\n").flat_map(|l| l.split('\n'));
        let start = lines.next().unwrap_or_default().trim();
        let mut words = start.split_whitespace();
        let ok = matches!(
            (words.next(), words.next()),
            (Some(version), Some("200")) if version.starts_with("HTTP/")
        );
        if !ok {
            return Err(SsdpError::UnexpectedStartLine(start.to_string()));
        }
        Ok(Self {
            headers: parse_headers(lines)?,
            source: None,
        })
    }

    /// Parses raw datagram bytes received from `source`.
    pub fn from_datagram(bytes: &[u8], source: SocketAddr) -> Result<Self, SsdpError> {
        let text = std::str::from_utf8(bytes).map_err(|_| SsdpError::NotText)?;
        Ok(Self::parse(text)?.with_source(source))
    }

    /// Case-insensitive header lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn server(&self) -> Option<&str> {
        self.get("SERVER")
    }

    pub fn search_target(&self) -> Option<&str> {
        self.get("ST")
    }

    pub fn usn(&self) -> Option<&str> {
        self.get("USN")
    }

    pub fn location(&self) -> Option<&str> {
        self.get("LOCATION")
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// The device address: the host part of `LOCATION` when it is an IP
    /// literal, else the datagram's source address.
    pub fn host(&self) -> Option<IpAddr> {
        self.location()
            .and_then(location_host)
            .or_else(|| self.source.map(|s| s.ip()))
    }

    /// Renders the datagram.
    pub fn render(&self) -> String {
        let mut out = String::from("HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\nEXT:\r\n");
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

impl Default for SsdpResponse {
    fn default() -> Self {
        Self::new()
    }
}

fn location_host(location: &str) -> Option<IpAddr> {
    let rest = location.split_once("://").map_or(location, |(_, r)| r);
    let authority = rest.split('/').next()?;
    if let Ok(addr) = authority.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    authority.parse::<IpAddr>().ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
