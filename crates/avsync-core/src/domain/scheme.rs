//! Schemes: immutable protocol registrations.
//!
//! A [`Scheme`] is built once with [`SchemeBuilder`] from a list of variable
//! definitions and then frozen behind an `Arc`.  Every target created from
//! it shares the definitions but owns its own live state.
//!
//! Each scheme automatically gets a catch-all variable with the id
//! [`FALLBACK_ID`].  It is not part of [`Scheme::variables`]; it receives
//! every line that no declared variable decoded.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::value::{Domain, DomainError};
use crate::domain::variable::VariableDef;
use crate::protocol::codec::FallbackCodec;
use crate::protocol::ssdp::SsdpResponse;
use crate::protocol::uri::TargetUri;

/// Identifier of the catch-all variable every scheme carries.
pub const FALLBACK_ID: &str = "fallback";

/// Turns a discovery response into a client URI if it describes a device of
/// this scheme.
pub type Identify = Arc<dyn Fn(&SsdpResponse) -> Option<TargetUri> + Send + Sync>;

/// Errors raised while building a scheme or one of its variables.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemeError {
    #[error("invalid identifier {0:?}")]
    InvalidId(String),
    #[error("variable {variable}: {source}")]
    InvalidValue {
        variable: String,
        #[source]
        source: DomainError,
    },
    #[error("variable {0} is declared twice")]
    DuplicateVariable(String),
    #[error("{0:?} is reserved for the fallback variable")]
    Reserved(String),
    #[error("preload refers to unknown variable {0}")]
    UnknownPreload(String),
}

/// A protocol description: its variables plus connection defaults.
pub struct Scheme {
    id: String,
    aliases: Vec<String>,
    description: String,
    client_args: Vec<String>,
    server_args: Vec<String>,
    default_port: Option<u16>,
    delimiter: u8,
    variables: Vec<Arc<VariableDef>>,
    fallback: Arc<VariableDef>,
    preload: Vec<String>,
    identify: Option<Identify>,
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheme")
            .field("id", &self.id)
            .field("aliases", &self.aliases)
            .field("default_port", &self.default_port)
            .field("variables", &self.variables.len())
            .field("preload", &self.preload)
            .finish()
    }
}

impl Scheme {
    pub fn builder(id: impl Into<String>) -> SchemeBuilder {
        SchemeBuilder {
            id: id.into(),
            aliases: Vec::new(),
            description: String::new(),
            client_args: vec!["host".to_string(), "port".to_string()],
            server_args: vec!["listen_host".to_string(), "listen_port".to_string()],
            default_port: None,
            delimiter: b'\r',
            variables: Vec::new(),
            preload: Vec::new(),
            identify: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Alternative identifiers, e.g. `vendor.Model` style names.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn client_args(&self) -> &[String] {
        &self.client_args
    }

    pub fn server_args(&self) -> &[String] {
        &self.server_args
    }

    pub fn default_port(&self) -> Option<u16> {
        self.default_port
    }

    /// Line terminator on the wire.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Declared variables in declaration order.
    pub fn variables(&self) -> &[Arc<VariableDef>] {
        &self.variables
    }

    pub fn variable(&self, id: &str) -> Option<&Arc<VariableDef>> {
        self.variables.iter().find(|v| v.id() == id)
    }

    pub fn fallback(&self) -> &Arc<VariableDef> {
        &self.fallback
    }

    /// Variables polled eagerly after every successful connect.
    pub fn preload(&self) -> &[String] {
        &self.preload
    }

    /// Asks the scheme whether `response` describes one of its devices.
    pub fn identify(&self, response: &SsdpResponse) -> Option<TargetUri> {
        self.identify.as_ref().and_then(|f| f(response))
    }

    /// `true` if `name` is the id or one of the aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.id == name || self.aliases.iter().any(|a| a == name)
    }

    /// Renders the client URI form, e.g. `denon:host:port`.
    pub fn usage(&self) -> String {
        std::iter::once(self.id.as_str())
            .chain(self.client_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Renders the server URI form, e.g. `denon:listen_host:listen_port`.
    pub fn server_usage(&self) -> String {
        std::iter::once(self.id.as_str())
            .chain(self.server_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Builder returned by [`Scheme::builder`].
pub struct SchemeBuilder {
    id: String,
    aliases: Vec<String>,
    description: String,
    client_args: Vec<String>,
    server_args: Vec<String>,
    default_port: Option<u16>,
    delimiter: u8,
    variables: Vec<VariableDef>,
    preload: Vec<String>,
    identify: Option<Identify>,
}

impl SchemeBuilder {
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Names of the URI segments after the scheme id for clients.
    pub fn client_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Names of the URI segments after the scheme id for servers.
    pub fn server_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = Some(port);
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn variable(mut self, def: VariableDef) -> Self {
        self.variables.push(def);
        self
    }

    pub fn preload<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn identify<F>(mut self, f: F) -> Self
    where
        F: Fn(&SsdpResponse) -> Option<TargetUri> + Send + Sync + 'static,
    {
        self.identify = Some(Arc::new(f));
        self
    }

    /// Freezes the scheme.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemeError`] for an invalid scheme id, duplicate or
    /// reserved variable ids, or a preload entry naming no variable.
    pub fn build(self) -> Result<Arc<Scheme>, SchemeError> {
        if self.id.is_empty() || self.id.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(SchemeError::InvalidId(self.id));
        }

        let mut seen = HashSet::new();
        for def in &self.variables {
            if def.id() == FALLBACK_ID {
                return Err(SchemeError::Reserved(def.id().to_string()));
            }
            if !seen.insert(def.id().to_string()) {
                return Err(SchemeError::DuplicateVariable(def.id().to_string()));
            }
        }
        if let Some(unknown) = self.preload.iter().find(|id| !seen.contains(*id)) {
            return Err(SchemeError::UnknownPreload(unknown.clone()));
        }

        let fallback = VariableDef::builder(FALLBACK_ID, FallbackCodec)
            .name("Unrecognised traffic")
            .category("Misc")
            .domain(Domain::Text)
            .build()?;

        Ok(Arc::new(Scheme {
            id: self.id,
            aliases: self.aliases,
            description: self.description,
            client_args: self.client_args,
            server_args: self.server_args,
            default_port: self.default_port,
            delimiter: self.delimiter,
            variables: self.variables.into_iter().map(Arc::new).collect(),
            fallback: Arc::new(fallback),
            preload: self.preload,
            identify: self.identify,
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
