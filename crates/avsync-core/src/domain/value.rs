//! Typed values carried by shared variables and the domains that constrain them.
//!
//! A [`Value`] is what a variable holds once it is "set".  A [`Domain`]
//! describes which values are legal for a variable: a boolean, an integer or
//! decimal range, a closed list of options, or free text.
//!
//! # Unset is not a value
//!
//! There is deliberately no `Value::None`.  A variable that has not received
//! data yet is represented one level up as `Option<Value>` = `None`, so the
//! framework can never confuse "unknown" with `0`, `false`, or `""`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A typed value held by a shared variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric value of an integer or decimal.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// A value was rejected by a variable's domain.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    #[error("{value} is outside the range {min}..={max}")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },
    #[error("{value:?} is not one of {options:?}")]
    UnknownOption { value: String, options: Vec<String> },
    #[error("expected a {expected} value, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
    #[error("cannot parse {input:?} as a {expected} value")]
    Unparsable {
        input: String,
        expected: &'static str,
    },
}

/// The set of legal values for a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Boolean,
    /// Inclusive integer range.
    Integer { min: i64, max: i64 },
    /// Inclusive decimal range.  Values are rounded to multiples of
    /// `precision` before they are encoded (`precision <= 0` disables rounding).
    Decimal { min: f64, max: f64, precision: f64 },
    /// A closed list of option names.
    Options(Vec<String>),
    /// Free text, used by the fallback variable.
    Text,
}

impl Domain {
    /// Convenience constructor for [`Domain::Options`].
    pub fn options<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Domain::Options(options.into_iter().map(Into::into).collect())
    }

    /// Name of the value type this domain accepts.
    pub fn type_name(&self) -> &'static str {
        match self {
            Domain::Boolean => "boolean",
            Domain::Integer { .. } => "integer",
            Domain::Decimal { .. } => "decimal",
            Domain::Options(_) => "option",
            Domain::Text => "text",
        }
    }

    /// Converts `value` to this domain's value type without checking bounds.
    ///
    /// Integral decimals become integers, integers become decimals, and
    /// anything becomes text for [`Domain::Text`].
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::TypeMismatch`] when no lossless conversion exists.
    pub fn coerce(&self, value: Value) -> Result<Value, DomainError> {
        let mismatch = |v: &Value| DomainError::TypeMismatch {
            expected: self.type_name(),
            got: v.type_name(),
        };
        match (self, value) {
            (Domain::Boolean, v @ Value::Bool(_)) => Ok(v),
            (Domain::Integer { .. }, v @ Value::Integer(_)) => Ok(v),
            (Domain::Integer { .. }, Value::Decimal(d))
                if d.fract() == 0.0 && d.is_finite() && d.abs() < i64::MAX as f64 =>
            {
                Ok(Value::Integer(d as i64))
            }
            (Domain::Decimal { .. }, v @ Value::Decimal(_)) => Ok(v),
            (Domain::Decimal { .. }, Value::Integer(i)) => Ok(Value::Decimal(i as f64)),
            (Domain::Options(_), v @ Value::Text(_)) => Ok(v),
            (Domain::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (Domain::Text, other) => Ok(Value::Text(other.to_string())),
            (_, other) => Err(mismatch(&other)),
        }
    }

    /// Coerces `value` and checks it against the bounds or option list.
    ///
    /// # Errors
    ///
    /// Returns a [`DomainError`] describing why the value is illegal.
    pub fn check(&self, value: Value) -> Result<Value, DomainError> {
        let value = self.coerce(value)?;
        match (self, &value) {
            (Domain::Integer { min, max }, Value::Integer(i)) if i < min || i > max => {
                Err(DomainError::OutOfRange {
                    value: i.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                })
            }
            (Domain::Decimal { min, max, .. }, Value::Decimal(d))
                if d.is_nan() || d < min || d > max =>
            {
                Err(DomainError::OutOfRange {
                    value: d.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                })
            }
            (Domain::Options(options), Value::Text(s)) if !options.iter().any(|o| o == s) => {
                Err(DomainError::UnknownOption {
                    value: s.clone(),
                    options: options.clone(),
                })
            }
            _ => Ok(value),
        }
    }

    /// Rounds decimals to the domain's declared precision.  Other values are
    /// returned unchanged.
    pub fn round(&self, value: &Value) -> Value {
        match (self, value) {
            (Domain::Decimal { precision, .. }, Value::Decimal(d)) if *precision > 0.0 => {
                let steps_per_unit = 1.0 / precision;
                Value::Decimal((d * steps_per_unit).round() / steps_per_unit)
            }
            _ => value.clone(),
        }
    }

    /// The value a test double reports when nothing more specific is
    /// configured: `false`, the midpoint of a numeric range, or the first
    /// option.
    pub fn dummy_value(&self) -> Value {
        match self {
            Domain::Boolean => Value::Bool(false),
            // Widened so ranges spanning most of i64 do not overflow.
            Domain::Integer { min, max } => {
                Value::Integer((i128::from(*min) + i128::from(*max)).div_euclid(2) as i64)
            }
            Domain::Decimal { min, max, .. } => self.round(&Value::Decimal(min / 2.0 + max / 2.0)),
            Domain::Options(options) => {
                Value::Text(options.first().cloned().unwrap_or_default())
            }
            Domain::Text => Value::Text(String::new()),
        }
    }

    /// Parses operator input such as `on`, `49.5` or an option name.
    ///
    /// Option names match case-insensitively and are returned in their
    /// declared spelling.  The result is checked against the domain.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Unparsable`] for text that is not a value of
    /// this type, or any error from [`Domain::check`].
    pub fn parse(&self, input: &str) -> Result<Value, DomainError> {
        let trimmed = input.trim();
        let unparsable = || DomainError::Unparsable {
            input: input.to_string(),
            expected: self.type_name(),
        };
        let value = match self {
            Domain::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => Value::Bool(true),
                "off" | "false" | "0" | "no" | "standby" => Value::Bool(false),
                _ => return Err(unparsable()),
            },
            Domain::Integer { .. } => {
                Value::Integer(trimmed.parse::<i64>().map_err(|_| unparsable())?)
            }
            Domain::Decimal { .. } => {
                Value::Decimal(trimmed.parse::<f64>().map_err(|_| unparsable())?)
            }
            Domain::Options(options) => options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(trimmed))
                .map(|o| Value::Text(o.clone()))
                .unwrap_or_else(|| Value::Text(trimmed.to_string())),
            Domain::Text => Value::Text(input.to_string()),
        };
        self.check(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
