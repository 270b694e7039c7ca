//! Declarative description of one synchronised variable.
//!
//! A [`VariableDef`] is immutable metadata: identifier, display name,
//! category, domain, default and dummy values, and the codec that maps it to
//! wire lines.  The live cached value lives in the runtime crate; a definition
//! can be shared by any number of targets.

use std::fmt;
use std::sync::Arc;

use crate::domain::scheme::SchemeError;
use crate::domain::value::{Domain, DomainError, Value};
use crate::protocol::codec::{DecodeError, EncodeError, VariableCodec};

/// Metadata for one variable of a scheme's catalog.
#[derive(Clone)]
pub struct VariableDef {
    id: String,
    name: String,
    category: String,
    domain: Domain,
    default: Option<Value>,
    dummy: Option<Value>,
    codec: Arc<dyn VariableCodec>,
}

impl fmt::Debug for VariableDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDef")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("default", &self.default)
            .field("codec", &self.codec)
            .finish()
    }
}

impl VariableDef {
    /// Starts a definition for variable `id` carried by `codec`.
    pub fn builder(id: impl Into<String>, codec: impl VariableCodec + 'static) -> VariableBuilder {
        let id = id.into();
        VariableBuilder {
            name: id.clone(),
            id,
            category: "General".to_string(),
            domain: Domain::Text,
            default: None,
            dummy: None,
            codec: Arc::new(codec),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Value adopted when a poll goes unanswered.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Value a test double reports: the configured dummy, else the default,
    /// else the domain's own dummy value.
    pub fn dummy_value(&self) -> Value {
        self.dummy
            .clone()
            .or_else(|| self.default.clone())
            .unwrap_or_else(|| self.domain.dummy_value())
    }

    pub fn poll_command(&self) -> Option<String> {
        self.codec.poll_command()
    }

    /// `true` for variables the peer only pushes.
    pub fn is_push_only(&self) -> bool {
        self.codec.poll_command().is_none()
    }

    pub fn matches(&self, line: &str) -> bool {
        self.codec.matches(line)
    }

    /// `true` if `line` is this variable's poll command.
    pub fn is_poll(&self, line: &str) -> bool {
        self.codec.poll_command().as_deref() == Some(line)
    }

    /// Decodes a matching line into a value of this variable's type.
    ///
    /// Bounds are not enforced: the device is the authority on what its
    /// state is.
    pub fn decode(&self, line: &str) -> Result<Value, DecodeError> {
        let value = self.codec.decode(line)?;
        self.domain
            .coerce(value)
            .map_err(|e| DecodeError::Malformed {
                line: line.to_string(),
                reason: e.to_string(),
            })
    }

    /// Checks `value` against the domain without encoding it.
    pub fn check(&self, value: Value) -> Result<Value, DomainError> {
        self.domain.check(value)
    }

    /// Encodes `value` after rounding it to the domain's precision.  The
    /// caller is responsible for the domain check.
    pub fn encode(&self, value: &Value) -> Result<String, EncodeError> {
        self.codec.encode(&self.domain.round(value))
    }
}

/// Builder returned by [`VariableDef::builder`].
pub struct VariableBuilder {
    id: String,
    name: String,
    category: String,
    domain: Domain,
    default: Option<Value>,
    dummy: Option<Value>,
    codec: Arc<dyn VariableCodec>,
}

impl VariableBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn dummy(mut self, value: impl Into<Value>) -> Self {
        self.dummy = Some(value.into());
        self
    }

    /// Validates the identifier and the default and dummy values.
    ///
    /// # Errors
    ///
    /// [`SchemeError::InvalidId`] for empty identifiers or identifiers with
    /// whitespace or `:`; [`SchemeError::InvalidValue`] when the default or
    /// dummy value is outside the domain.
    pub fn build(self) -> Result<VariableDef, SchemeError> {
        if self.id.is_empty() || self.id.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(SchemeError::InvalidId(self.id));
        }
        let default = self
            .default
            .map(|v| self.domain.check(v))
            .transpose()
            .map_err(|source| SchemeError::InvalidValue {
                variable: self.id.clone(),
                source,
            })?;
        let dummy = self
            .dummy
            .map(|v| self.domain.check(v))
            .transpose()
            .map_err(|source| SchemeError::InvalidValue {
                variable: self.id.clone(),
                source,
            })?;
        Ok(VariableDef {
            id: self.id,
            name: self.name,
            category: self.category,
            domain: self.domain,
            default,
            dummy,
            codec: self.codec,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{LineFormat, PrefixCodec};

    fn volume() -> VariableDef {
        VariableDef::builder("volume", PrefixCodec::new("MV", LineFormat::Digits { width: 2 }))
            .name("Master volume")
            .domain(Domain::Integer { min: 0, max: 98 })
            .dummy(49)
            .build()
            .expect("valid definition")
    }

    #[test]
    fn test_build_rejects_id_with_colon() {
        let result = VariableDef::builder("a:b", PrefixCodec::new("X", LineFormat::Text)).build();
        assert!(matches!(result, Err(SchemeError::InvalidId(_))));
    }

    #[test]
    fn test_build_rejects_default_outside_domain() {
        let result = VariableDef::builder("volume", PrefixCodec::new("MV", LineFormat::Text))
            .domain(Domain::Integer { min: 0, max: 98 })
            .default(120)
            .build();
        assert!(matches!(result, Err(SchemeError::InvalidValue { .. })));
    }

    #[test]
    fn test_dummy_value_prefers_configured_dummy() {
        assert_eq!(volume().dummy_value(), Value::Integer(49));
    }

    #[test]
    fn test_dummy_value_falls_back_to_default_then_domain() {
        // Arrange
        let with_default = VariableDef::builder("power", PrefixCodec::new("PW", LineFormat::flag("ON", "STANDBY")))
            .domain(Domain::Boolean)
            .default(true)
            .build()
            .expect("valid definition");
        let bare = VariableDef::builder("level", PrefixCodec::new("LV", LineFormat::Digits { width: 2 }))
            .domain(Domain::Integer { min: 10, max: 20 })
            .build()
            .expect("valid definition");

        // Assert
        assert_eq!(with_default.dummy_value(), Value::Bool(true));
        assert_eq!(bare.dummy_value(), Value::Integer(15));
    }

    #[test]
    fn test_decode_coerces_to_domain_type() {
        let def = VariableDef::builder("volume", PrefixCodec::new("MV", LineFormat::Tenths { width: 2 }))
            .domain(Domain::Integer { min: 0, max: 98 })
            .build()
            .expect("valid definition");
        assert_eq!(def.decode("MV49"), Ok(Value::Integer(49)));
        assert!(def.decode("MV495").is_err());
    }

    #[test]
    fn test_encode_rounds_to_precision() {
        let def = VariableDef::builder("volume", PrefixCodec::new("MV", LineFormat::Tenths { width: 2 }))
            .domain(Domain::Decimal {
                min: 0.0,
                max: 98.0,
                precision: 0.5,
            })
            .build()
            .expect("valid definition");
        assert_eq!(def.encode(&Value::Decimal(49.3)), Ok("MV495".to_string()));
    }

    #[test]
    fn test_is_poll_recognises_poll_command() {
        assert!(volume().is_poll("MV?"));
        assert!(!volume().is_poll("MV49"));
        assert!(!volume().is_push_only());
    }
}
