//! Per-variable line codecs.
//!
//! The transport only moves delimited ASCII lines; deciding which line belongs
//! to which variable, and how the payload maps to a [`Value`], is the job of a
//! [`VariableCodec`].  Each variable in a scheme's catalog carries its own codec.
//!
//! # Prefix-addressed protocols
//!
//! Many AV receivers address state with a short command prefix followed by a
//! payload, and poll it with the prefix plus `?`:
//!
//! ```text
//! PW?        -> PWON        (power, on/off tokens)
//! MV?        -> MV495       (master volume 49.5, trailing tenths digit)
//! SI?        -> SICD        (input source, option token)
//! ```
//!
//! [`PrefixCodec`] covers this family with a [`LineFormat`] describing the
//! payload.  Protocols that do not fit can implement [`VariableCodec`] directly.

use std::fmt;

use thiserror::Error;

use crate::domain::value::Value;

/// A line matched a variable but could not be turned into a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("line {line:?} is not addressed to this variable")]
    NotAddressed { line: String },
    #[error("malformed line {line:?}: {reason}")]
    Malformed { line: String, reason: String },
}

/// A value could not be rendered as a wire line.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("{format} payloads cannot carry a {got} value")]
    TypeMismatch {
        format: &'static str,
        got: &'static str,
    },
    #[error("{value} cannot be represented on the wire: {reason}")]
    Unrepresentable { value: String, reason: String },
}

/// Recognises, decodes and encodes the lines of one variable.
pub trait VariableCodec: Send + Sync + fmt::Debug {
    /// Returns `true` if `line` carries this variable's value.
    fn matches(&self, line: &str) -> bool;

    /// Extracts the value from a matching line.
    fn decode(&self, line: &str) -> Result<Value, DecodeError>;

    /// Renders `value` as the line that sets it.
    fn encode(&self, value: &Value) -> Result<String, EncodeError>;

    /// The line that asks the peer for the current value, or `None` for
    /// variables the peer only pushes.
    fn poll_command(&self) -> Option<String>;
}

/// Payload layout after the command prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum LineFormat {
    /// A boolean carried as one of two tokens, e.g. `ON`/`STANDBY`.
    Flag { on: String, off: String },
    /// A zero-padded integer, e.g. `05`.
    Digits { width: usize },
    /// A zero-padded whole part with an optional trailing tenths digit:
    /// `49` is 49.0 and `495` is 49.5.  Lossy: only one decimal is kept.
    Tenths { width: usize },
    /// Option tokens: `(wire token, option name)` pairs.
    Choice(Vec<(String, String)>),
    /// The payload verbatim.
    Text,
}

impl LineFormat {
    pub fn flag(on: impl Into<String>, off: impl Into<String>) -> Self {
        LineFormat::Flag {
            on: on.into(),
            off: off.into(),
        }
    }

    /// Options whose wire token equals the option name.
    pub fn choice<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LineFormat::Choice(
            options
                .into_iter()
                .map(|o| {
                    let o = o.into();
                    (o.clone(), o)
                })
                .collect(),
        )
    }

    fn name(&self) -> &'static str {
        match self {
            LineFormat::Flag { .. } => "flag",
            LineFormat::Digits { .. } => "digits",
            LineFormat::Tenths { .. } => "tenths",
            LineFormat::Choice(_) => "choice",
            LineFormat::Text => "text",
        }
    }

    fn parse(&self, payload: &str) -> Result<Value, String> {
        match self {
            LineFormat::Flag { on, off } => {
                if payload == on {
                    Ok(Value::Bool(true))
                } else if payload == off {
                    Ok(Value::Bool(false))
                } else {
                    Err(format!("expected {on:?} or {off:?}"))
                }
            }
            LineFormat::Digits { .. } => {
                let digits = payload.strip_prefix('-').unwrap_or(payload);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err("expected digits".to_string());
                }
                payload
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| e.to_string())
            }
            LineFormat::Tenths { width } => {
                if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
                    return Err("expected digits".to_string());
                }
                let split = (*width).min(payload.len()).max(1);
                let (whole, tenths) = payload.split_at(split);
                if tenths.len() > 1 {
                    return Err(format!("at most one tenths digit after {width} digits"));
                }
                let whole = whole.parse::<i64>().map_err(|e| e.to_string())? as f64;
                let tenths = match tenths.bytes().next() {
                    Some(b) => f64::from(b - b'0') / 10.0,
                    None => 0.0,
                };
                Ok(Value::Decimal(whole + tenths))
            }
            LineFormat::Choice(pairs) => pairs
                .iter()
                .find(|(wire, _)| wire == payload)
                .map(|(_, option)| Value::Text(option.clone()))
                .ok_or_else(|| "unknown option token".to_string()),
            LineFormat::Text => Ok(Value::Text(payload.to_string())),
        }
    }

    fn render(&self, value: &Value) -> Result<String, EncodeError> {
        let mismatch = || EncodeError::TypeMismatch {
            format: self.name(),
            got: value.type_name(),
        };
        match (self, value) {
            (LineFormat::Flag { on, off }, Value::Bool(b)) => {
                Ok(if *b { on.clone() } else { off.clone() })
            }
            (LineFormat::Digits { width }, Value::Integer(i)) => Ok(if *i < 0 {
                format!("-{:0width$}", i.unsigned_abs(), width = *width)
            } else {
                format!("{:0width$}", i, width = *width)
            }),
            (LineFormat::Tenths { width }, v @ (Value::Decimal(_) | Value::Integer(_))) => {
                let number = v.as_f64().ok_or_else(mismatch)?;
                if !number.is_finite() || number < 0.0 {
                    return Err(EncodeError::Unrepresentable {
                        value: number.to_string(),
                        reason: "only non-negative numbers are supported".to_string(),
                    });
                }
                let mut whole = number.trunc() as u64;
                let mut tenths = ((number - number.trunc()) * 10.0).round() as u64;
                if tenths == 10 {
                    whole += 1;
                    tenths = 0;
                }
                if tenths == 0 {
                    Ok(format!("{:0width$}", whole, width = *width))
                } else {
                    Ok(format!("{:0width$}{}", whole, tenths, width = *width))
                }
            }
            (LineFormat::Choice(pairs), Value::Text(option)) => pairs
                .iter()
                .find(|(_, name)| name == option)
                .map(|(wire, _)| wire.clone())
                .ok_or_else(|| EncodeError::Unrepresentable {
                    value: option.clone(),
                    reason: "no wire token for this option".to_string(),
                }),
            (LineFormat::Text, v) => Ok(v.to_string()),
            _ => Err(mismatch()),
        }
    }
}

/// A codec for `<prefix><payload>` lines.
///
/// The poll command defaults to `<prefix>?`.
#[derive(Debug, Clone)]
pub struct PrefixCodec {
    prefix: String,
    exclude: Vec<String>,
    format: LineFormat,
    poll: Option<String>,
}

impl PrefixCodec {
    pub fn new(prefix: impl Into<String>, format: LineFormat) -> Self {
        let prefix = prefix.into();
        Self {
            poll: Some(format!("{prefix}?")),
            prefix,
            exclude: Vec::new(),
            format,
        }
    }

    /// Uses `command` instead of `<prefix>?` to poll.
    pub fn poll_with(mut self, command: impl Into<String>) -> Self {
        self.poll = Some(command.into());
        self
    }

    /// The peer pushes this variable on its own; it cannot be polled.
    pub fn push_only(mut self) -> Self {
        self.poll = None;
        self
    }

    /// Ignores lines starting with `prefix` even though they share this
    /// codec's prefix (`MV` volume vs. `MVMAX` limit).
    pub fn except(mut self, prefix: impl Into<String>) -> Self {
        self.exclude.push(prefix.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn format(&self) -> &LineFormat {
        &self.format
    }
}

impl VariableCodec for PrefixCodec {
    fn matches(&self, line: &str) -> bool {
        line.starts_with(&self.prefix)
            && !self.exclude.iter().any(|e| line.starts_with(e.as_str()))
            && self.poll.as_deref() != Some(line)
    }

    fn decode(&self, line: &str) -> Result<Value, DecodeError> {
        let payload = line
            .strip_prefix(&self.prefix)
            .ok_or_else(|| DecodeError::NotAddressed {
                line: line.to_string(),
            })?;
        self.format
            .parse(payload)
            .map_err(|reason| DecodeError::Malformed {
                line: line.to_string(),
                reason,
            })
    }

    fn encode(&self, value: &Value) -> Result<String, EncodeError> {
        Ok(format!("{}{}", self.prefix, self.format.render(value)?))
    }

    fn poll_command(&self) -> Option<String> {
        self.poll.clone()
    }
}

/// Accepts every line as text.  Backs the fallback variable that collects
/// traffic no other variable recognised.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackCodec;

impl VariableCodec for FallbackCodec {
    fn matches(&self, _line: &str) -> bool {
        true
    }

    fn decode(&self, line: &str) -> Result<Value, DecodeError> {
        Ok(Value::Text(line.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<String, EncodeError> {
        Ok(value.to_string())
    }

    fn poll_command(&self) -> Option<String> {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn power() -> PrefixCodec {
        PrefixCodec::new("PW", LineFormat::flag("ON", "STANDBY"))
    }

    fn volume() -> PrefixCodec {
        PrefixCodec::new("MV", LineFormat::Tenths { width: 2 }).except("MVMAX")
    }

    #[test]
    fn test_prefix_codec_matches_own_prefix_only() {
        assert!(power().matches("PWON"));
        assert!(!power().matches("MV49"));
    }

    #[test]
    fn test_prefix_codec_never_matches_its_poll_command() {
        assert!(!power().matches("PW?"));
    }

    #[test]
    fn test_prefix_codec_honours_exclusions() {
        assert!(volume().matches("MV49"));
        assert!(!volume().matches("MVMAX 98"));
    }

    #[test]
    fn test_default_poll_command_is_prefix_question_mark() {
        assert_eq!(power().poll_command().as_deref(), Some("PW?"));
        assert_eq!(power().push_only().poll_command(), None);
        assert_eq!(
            power().poll_with("ZM?").poll_command().as_deref(),
            Some("ZM?")
        );
    }

    #[test]
    fn test_flag_decodes_both_tokens() {
        assert_eq!(power().decode("PWON"), Ok(Value::Bool(true)));
        assert_eq!(power().decode("PWSTANDBY"), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_flag_rejects_other_tokens() {
        let result = power().decode("PWMAYBE");
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_tenths_decodes_whole_and_fractional_volume() {
        assert_eq!(volume().decode("MV49"), Ok(Value::Decimal(49.0)));
        assert_eq!(volume().decode("MV495"), Ok(Value::Decimal(49.5)));
        assert_eq!(volume().decode("MV05"), Ok(Value::Decimal(5.0)));
    }

    #[test]
    fn test_tenths_encodes_with_padding_and_trailing_digit() {
        assert_eq!(volume().encode(&Value::Decimal(49.5)), Ok("MV495".to_string()));
        assert_eq!(volume().encode(&Value::Decimal(5.0)), Ok("MV05".to_string()));
        assert_eq!(volume().encode(&Value::Integer(12)), Ok("MV12".to_string()));
    }

    #[test]
    fn test_tenths_rejects_negative_values() {
        let result = volume().encode(&Value::Decimal(-1.0));
        assert!(matches!(result, Err(EncodeError::Unrepresentable { .. })));
    }

    #[test]
    fn test_tenths_rejects_two_fraction_digits() {
        assert!(volume().decode("MV4955").is_err());
    }

    #[test]
    fn test_digits_round_trip_with_padding() {
        let codec = PrefixCodec::new("SV", LineFormat::Digits { width: 3 });
        assert_eq!(codec.encode(&Value::Integer(7)), Ok("SV007".to_string()));
        assert_eq!(codec.decode("SV007"), Ok(Value::Integer(7)));
        assert_eq!(codec.encode(&Value::Integer(-7)), Ok("SV-007".to_string()));
    }

    #[test]
    fn test_choice_maps_wire_tokens_to_option_names() {
        let codec = PrefixCodec::new(
            "SI",
            LineFormat::Choice(vec![("SAT/CBL".to_string(), "SAT".to_string())]),
        );
        assert_eq!(codec.decode("SISAT/CBL"), Ok(Value::from("SAT")));
        assert_eq!(codec.encode(&Value::from("SAT")), Ok("SISAT/CBL".to_string()));
        assert!(codec.encode(&Value::from("CD")).is_err());
    }

    #[test]
    fn test_encode_rejects_wrong_value_type() {
        let result = power().encode(&Value::Integer(1));
        assert_eq!(
            result,
            Err(EncodeError::TypeMismatch {
                format: "flag",
                got: "integer"
            })
        );
    }

    #[test]
    fn test_fallback_codec_accepts_everything_as_text() {
        let codec = FallbackCodec;
        assert!(codec.matches("XYZZY"));
        assert_eq!(codec.decode("XYZZY"), Ok(Value::from("XYZZY")));
        assert_eq!(codec.poll_command(), None);
    }
}
