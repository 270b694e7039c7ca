//! avsync command-line front-end.
//!
//! Talks to line-oriented AV receivers through the `avsync` runtime: read and
//! write their variables, watch them change, emulate one, or put a proxy in
//! front of one so several controllers share a single device connection.
//!
//! # Usage
//!
//! ```text
//! avsync [OPTIONS] <COMMAND>
//!
//! Commands:
//!   schemes                          List known schemes and their variables
//!   discover [--json]                Search the LAN for devices
//!   get [--uri URI] [ID]... [--json] Read variables (all when none given)
//!   set [--uri URI] ID VALUE [--force]
//!   watch [--uri URI]                Print every change until Ctrl+C
//!   serve URI [--advertise]          Run a dummy device, e.g. denon:0.0.0.0:2323
//!   proxy UPSTREAM LISTEN            Republish UPSTREAM on LISTEN
//!   config [--save]                  Print (or save) the effective configuration
//!
//! Options:
//!   --config <PATH>      Config file [env: AVSYNC_CONFIG]
//!   --log-level <LEVEL>  Overrides general.log_level [env: AVSYNC_LOG]
//! ```
//!
//! Targets are URIs: `denon:192.168.1.40`, `denon:192.168.1.40:23`, or
//! `emulate:denon` for an in-process dummy device.  Without `--uri` the
//! commands use `general.default_uri` from the config file.
//!
//! Logs go to stderr.  `RUST_LOG` takes precedence over both `--log-level`
//! and the config file.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use avsync::infrastructure::storage::config::{self, AppConfig};
use avsync::SchemeRegistry;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::Session;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "avsync",
    about = "Query, control, emulate and proxy line-oriented AV receivers",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, env = "AVSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, global = true, env = "AVSYNC_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List known schemes, their URI forms and variables.
    Schemes,
    /// Search the LAN for devices any scheme recognises.
    Discover {
        /// How long to wait for answers, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Read variables.
    Get {
        #[arg(long)]
        uri: Option<String>,
        /// Variable ids; all pollable variables when omitted.
        ids: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Write one variable.
    Set {
        #[arg(long)]
        uri: Option<String>,
        id: String,
        value: String,
        /// Send even if the value is outside the variable's domain.
        #[arg(long)]
        force: bool,
    },
    /// Print every change until Ctrl+C.
    Watch {
        #[arg(long)]
        uri: Option<String>,
    },
    /// Run a dummy device answering with default values.
    Serve {
        /// Server URI, e.g. `denon:0.0.0.0:2323`.
        uri: String,
        /// Answer SSDP searches so `discover` finds it.
        #[arg(long)]
        advertise: bool,
    },
    /// Republish a device so several controllers can share it.
    Proxy {
        upstream: String,
        listen: String,
    },
    /// Print the effective configuration.
    Config {
        /// Also write it to the config file.
        #[arg(long)]
        save: bool,
    },
}

impl Cli {
    /// Loads the config file named by `--config`, or the platform default.
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("cannot load config from {}", path.display())),
            None => config::load_config().context("cannot load config"),
        }
    }

    /// `--log-level` wins over the config file.
    fn log_level<'a>(&'a self, config: &'a AppConfig) -> &'a str {
        self.log_level.as_deref().unwrap_or(&config.general.log_level)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level(&config))),
        )
        .init();
    debug!(?cli, "starting");

    if let Command::Config { save } = &cli.command {
        return show_config(&cli, &config, *save);
    }

    let registry = SchemeRegistry::with_builtin().context("built-in schemes are inconsistent")?;
    let session = Session { config, registry };

    match &cli.command {
        Command::Schemes => {
            commands::schemes(&session);
            Ok(())
        }
        Command::Discover { timeout_ms, json } => {
            commands::discover_devices(&session, *timeout_ms, *json)
        }
        Command::Get { uri, ids, json } => commands::get(&session, uri.as_deref(), ids, *json),
        Command::Set {
            uri,
            id,
            value,
            force,
        } => commands::set(&session, uri.as_deref(), id, value, *force),
        Command::Watch { uri } => commands::watch(&session, uri.as_deref()),
        Command::Serve { uri, advertise } => commands::serve(&session, uri, *advertise),
        Command::Proxy { upstream, listen } => commands::proxy(&session, upstream, listen),
        Command::Config { .. } => Ok(()),
    }
}

fn show_config(cli: &Cli, config: &AppConfig, save: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config).context("cannot render config")?);
    if !save {
        return Ok(());
    }
    match &cli.config {
        Some(path) => {
            config::save_config_to(config, path)
                .with_context(|| format!("cannot save config to {}", path.display()))?;
            eprintln!("saved to {}", path.display());
        }
        None => {
            config::save_config(config).context("cannot save config")?;
            eprintln!("saved to {}", config::config_file_path()?.display());
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_parses_ids_and_json_flag() {
        // Arrange / Act
        let cli = Cli::parse_from(["avsync", "get", "--uri", "emulate:denon", "power", "volume", "--json"]);

        // Assert
        match cli.command {
            Command::Get { uri, ids, json } => {
                assert_eq!(uri.as_deref(), Some("emulate:denon"));
                assert_eq!(ids, vec!["power", "volume"]);
                assert!(json);
            }
            other => panic!("expected get, got {other:?}"),
        }
    }

    #[test]
    fn test_set_parses_force() {
        let cli = Cli::parse_from(["avsync", "set", "volume", "99", "--force"]);

        match cli.command {
            Command::Set { uri, id, value, force } => {
                assert_eq!(uri, None);
                assert_eq!(id, "volume");
                assert_eq!(value, "99");
                assert!(force);
            }
            other => panic!("expected set, got {other:?}"),
        }
    }

    #[test]
    fn test_proxy_takes_two_uris() {
        let cli = Cli::parse_from(["avsync", "proxy", "denon:10.0.0.5", "denon:0.0.0.0:2323"]);

        assert!(matches!(
            cli.command,
            Command::Proxy { ref upstream, ref listen }
                if upstream == "denon:10.0.0.5" && listen == "denon:0.0.0.0:2323"
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["avsync", "schemes", "--log-level", "debug", "--config", "/tmp/a.toml"]);

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.toml")));
    }

    #[test]
    fn test_log_level_flag_overrides_config() {
        let config = AppConfig::default();
        let quiet = Cli::parse_from(["avsync", "--log-level", "warn", "schemes"]);
        let plain = Cli::parse_from(["avsync", "schemes"]);

        assert_eq!(quiet.log_level(&config), "warn");
        assert_eq!(plain.log_level(&config), config.general.log_level);
    }

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let dir = std::env::temp_dir().join(format!("avsync-cli-test-{}", std::process::id()));
        let path = dir.join("absent.toml");
        let cli = Cli::parse_from(["avsync", "--config", path.to_str().expect("utf-8 path"), "schemes"]);

        let config = cli.load_config().expect("defaults");

        assert_eq!(config, AppConfig::default());
    }
}
