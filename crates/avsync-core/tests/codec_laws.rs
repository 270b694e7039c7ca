//! Integration tests for the round-trip laws of variable codecs.
//!
//! For every variable, decoding an encoded in-domain value must give the value
//! back.  Lossy encodings (tenths of a unit) must instead give the value
//! rounded to the domain's declared precision.  Framing is exercised through
//! `tokio_util::codec::Framed` over `tokio-test` mock I/O.

use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::Framed;

use avsync_core::{Domain, LineCodec, LineFormat, PrefixCodec, Value, VariableDef};

fn power() -> VariableDef {
    VariableDef::builder("power", PrefixCodec::new("PW", LineFormat::flag("ON", "STANDBY")))
        .domain(Domain::Boolean)
        .build()
        .expect("valid definition")
}

fn volume() -> VariableDef {
    VariableDef::builder(
        "volume",
        PrefixCodec::new("MV", LineFormat::Tenths { width: 2 }).except("MVMAX"),
    )
    .domain(Domain::Decimal {
        min: 0.0,
        max: 98.0,
        precision: 0.5,
    })
    .build()
    .expect("valid definition")
}

fn level() -> VariableDef {
    VariableDef::builder("level", PrefixCodec::new("SW", LineFormat::Digits { width: 2 }))
        .domain(Domain::Integer { min: 0, max: 98 })
        .build()
        .expect("valid definition")
}

fn source() -> VariableDef {
    VariableDef::builder(
        "source",
        PrefixCodec::new(
            "SI",
            LineFormat::Choice(vec![
                ("CD".to_string(), "CD".to_string()),
                ("SAT/CBL".to_string(), "SAT".to_string()),
            ]),
        ),
    )
    .domain(Domain::options(["CD", "SAT"]))
    .build()
    .expect("valid definition")
}

fn roundtrip(def: &VariableDef, value: Value) -> Value {
    let line = def.encode(&value).expect("encode must succeed");
    assert!(def.matches(&line), "{line:?} must be recognised by its own variable");
    def.decode(&line).expect("decode must succeed")
}

#[test]
fn test_boolean_roundtrip_is_exact() {
    for b in [true, false] {
        assert_eq!(roundtrip(&power(), Value::Bool(b)), Value::Bool(b));
    }
}

#[test]
fn test_integer_roundtrip_is_exact_over_whole_domain() {
    let def = level();
    for i in 0..=98 {
        assert_eq!(roundtrip(&def, Value::Integer(i)), Value::Integer(i));
    }
}

#[test]
fn test_option_roundtrip_is_exact() {
    let def = source();
    for option in ["CD", "SAT"] {
        assert_eq!(roundtrip(&def, Value::from(option)), Value::from(option));
    }
}

#[test]
fn test_tenths_roundtrip_equals_rounded_value() {
    let def = volume();
    let mut v = 0.0;
    while v <= 98.0 {
        let expected = def.domain().round(&Value::Decimal(v));
        assert_eq!(roundtrip(&def, Value::Decimal(v)), expected, "value {v}");
        v += 0.1;
    }
}

#[test]
fn test_out_of_domain_value_is_rejected_by_check() {
    assert!(volume().check(Value::Decimal(200.0)).is_err());
    assert!(level().check(Value::Integer(-1)).is_err());
    assert!(source().check(Value::from("PHONO")).is_err());
}

#[tokio::test]
async fn test_framed_stream_yields_lines_in_order() {
    let io = tokio_test::io::Builder::new()
        .read(b"PWON\rMV4")
        .read(b"95\r")
        .build();
    let mut framed = Framed::new(io, LineCodec::default());

    let first = framed.next().await.expect("line").expect("ok");
    let second = framed.next().await.expect("line").expect("ok");

    assert_eq!(first, "PWON");
    assert_eq!(second, "MV495");
    assert_eq!(volume().decode(&second), Ok(Value::Decimal(49.5)));
}

#[tokio::test]
async fn test_framed_sink_writes_delimited_lines() {
    let io = tokio_test::io::Builder::new().write(b"PW?\r").build();
    let mut framed = Framed::new(io, LineCodec::default());

    framed.send("PW?").await.expect("send must succeed");
}
