//! Target URIs: `scheme:arg1:arg2:...`.
//!
//! The first segment selects a registered scheme; the remaining segments are
//! role specific.  Clients usually take `host:port`, servers
//! `listen_host:listen_port`, and `emulate:<scheme>` asks for an in-process
//! dummy server.  Empty trailing segments fall back to defaults.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum UriError {
    #[error("empty target URI")]
    Empty,
    #[error("missing argument {name} in {uri}")]
    MissingArgument { uri: String, name: &'static str },
    #[error("invalid port {value:?} in {uri}")]
    InvalidPort { uri: String, value: String },
}

/// A parsed `scheme:arg:...` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetUri {
    scheme: String,
    args: Vec<String>,
}

impl TargetUri {
    pub fn new<I, S>(scheme: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scheme: scheme.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses `input`.
    ///
    /// # Errors
    ///
    /// [`UriError::Empty`] when the scheme segment is empty.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let mut parts = input.trim().split(':');
        let scheme = parts.next().unwrap_or_default();
        if scheme.is_empty() {
            return Err(UriError::Empty);
        }
        Ok(Self {
            scheme: scheme.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The `index`th argument, `None` when absent or empty.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Interprets the first two arguments as host and port.
    ///
    /// A missing host becomes `default_host`; a missing port becomes
    /// `default_port`.
    ///
    /// # Errors
    ///
    /// [`UriError::MissingArgument`] when no port is given and there is no
    /// default; [`UriError::InvalidPort`] when the port is not a `u16`.
    pub fn host_port(
        &self,
        default_host: &str,
        default_port: Option<u16>,
    ) -> Result<(String, u16), UriError> {
        let host = self.arg(0).unwrap_or(default_host).to_string();
        let port = match self.arg(1) {
            Some(value) => value.parse::<u16>().map_err(|_| UriError::InvalidPort {
                uri: self.to_string(),
                value: value.to_string(),
            })?,
            None => default_port.ok_or_else(|| UriError::MissingArgument {
                uri: self.to_string(),
                name: "port",
            })?,
        };
        Ok((host, port))
    }
}

impl fmt::Display for TargetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme)?;
        for arg in &self.args {
            write!(f, ":{arg}")?;
        }
        Ok(())
    }
}

impl FromStr for TargetUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
