//! Denon/Marantz AVR telnet protocol (port 23, CR-terminated).
//!
//! Only a handful of main-zone variables; the full catalog is much larger.
//!
//! | id           | lines                 | notes                          |
//! |--------------|-----------------------|--------------------------------|
//! | `power`      | `PWON` / `PWSTANDBY`  |                                |
//! | `volume`     | `MV49`, `MV495`       | 0.5 dB steps, tenths digit     |
//! | `volume_max` | `MVMAX 98`            | pushed after every `MV` change |
//! | `mute`       | `MUON` / `MUOFF`      |                                |
//! | `source`     | `SICD`, `SITUNER`, …  |                                |

use std::sync::Arc;

use avsync_core::{Domain, LineFormat, PrefixCodec, Scheme, SchemeError, TargetUri, VariableDef};

use crate::infrastructure::network::discovery::PORT_HEADER;

pub const ID: &str = "denon";
pub const DEFAULT_PORT: u16 = 23;

/// Input source tokens as they appear on the wire.
const SOURCES: &[&str] = &[
    "PHONO", "CD", "TUNER", "DVD", "BD", "TV", "SAT/CBL", "MPLAY", "GAME", "NET", "BT", "AUX1",
];

pub fn scheme() -> Result<Arc<Scheme>, SchemeError> {
    Scheme::builder(ID)
        .alias("denon.AVR")
        .description("Denon/Marantz AV receiver over telnet")
        .client_args(["host", "port"])
        .server_args(["listen_host", "listen_port"])
        .default_port(DEFAULT_PORT)
        .delimiter(b'\r')
        .variable(
            VariableDef::builder("power", PrefixCodec::new("PW", LineFormat::flag("ON", "STANDBY")))
                .name("Power")
                .category("General")
                .domain(Domain::Boolean)
                .default(false)
                .build()?,
        )
        .variable(
            VariableDef::builder(
                "volume",
                PrefixCodec::new("MV", LineFormat::Tenths { width: 2 }).except("MVMAX"),
            )
            .name("Master volume")
            .category("Volume")
            .domain(Domain::Decimal {
                min: 0.0,
                max: 98.0,
                precision: 0.5,
            })
            .dummy(49.0)
            .build()?,
        )
        .variable(
            VariableDef::builder(
                "volume_max",
                PrefixCodec::new("MVMAX ", LineFormat::Tenths { width: 2 }).push_only(),
            )
            .name("Volume limit")
            .category("Volume")
            .domain(Domain::Decimal {
                min: 0.0,
                max: 98.0,
                precision: 0.5,
            })
            .dummy(98.0)
            .build()?,
        )
        .variable(
            VariableDef::builder("mute", PrefixCodec::new("MU", LineFormat::flag("ON", "OFF")))
                .name("Mute")
                .category("Volume")
                .domain(Domain::Boolean)
                .default(false)
                .build()?,
        )
        .variable(
            VariableDef::builder("source", PrefixCodec::new("SI", LineFormat::choice(SOURCES.iter().copied())))
                .name("Input source")
                .category("Input")
                .domain(Domain::options(SOURCES.iter().copied()))
                .build()?,
        )
        .preload(["power", "volume", "mute", "source"])
        .identify(|response| {
            let vendor = [response.server(), response.search_target()]
                .into_iter()
                .flatten()
                .any(|h| h.contains("Denon") || h.contains("Marantz"));
            if !vendor {
                return None;
            }
            let host = response.host()?;
            let port = response
                .get(PORT_HEADER)
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT);
            Some(TargetUri::new(ID, [host.to_string(), port.to_string()]))
        })
        .build()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
