//! The subcommands.  Each one builds its targets from the registry, runs, and
//! exits them before returning.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use avsync::infrastructure::storage::config::AppConfig;
use avsync::{
    discover, start_discovery_responder, Advertisement, Client, Domain, SchemeRegistry,
    SharedVariable, Target, TargetObserver, TargetUri, Value,
};
use serde::Serialize;
use tracing::{info, warn};

/// Standard SSDP port the responder of `serve --advertise` binds.
const SSDP_BIND: &str = "0.0.0.0:1900";

pub struct Session {
    pub config: AppConfig,
    pub registry: SchemeRegistry,
}

impl Session {
    /// `uri`, or the configured default target.
    fn target_uri(&self, uri: Option<&str>) -> anyhow::Result<TargetUri> {
        let text = uri
            .or(self.config.general.default_uri.as_deref())
            .ok_or_else(|| anyhow!("no target URI given and no general.default_uri configured"))?;
        TargetUri::parse(text).with_context(|| format!("invalid target URI '{text}'"))
    }

    fn connect(&self, uri: Option<&str>) -> anyhow::Result<Client> {
        let uri = self.target_uri(uri)?;
        let client = self
            .registry
            .new_client(&uri, self.config.target_config())
            .with_context(|| format!("cannot build a client for '{uri}'"))?;
        client
            .connect()
            .with_context(|| format!("cannot connect to {}", client.endpoint()))?;
        Ok(client)
    }
}

// ── schemes ───────────────────────────────────────────────────────────────────

pub fn schemes(session: &Session) {
    for scheme in session.registry.schemes() {
        println!("{}", scheme.usage());
        if !scheme.description().is_empty() {
            println!("    {}", scheme.description());
        }
        if !scheme.aliases().is_empty() {
            println!("    aliases: {}", scheme.aliases().join(", "));
        }
        println!("    serve as: {}", scheme.server_usage());
        for def in scheme.variables() {
            println!("    {:<12} {:<8} {}", def.id(), def.domain().type_name(), def.name());
        }
    }
    println!("emulate:<scheme>");
    println!("    in-process dummy device, no network");
}

// ── discover ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FoundDevice {
    uri: String,
    scheme: String,
    server: Option<String>,
}

pub fn discover_devices(session: &Session, timeout_ms: Option<u64>, json: bool) -> anyhow::Result<()> {
    let mut settings = session.config.discovery_settings();
    if let Some(ms) = timeout_ms {
        settings.timeout = Duration::from_millis(ms);
    }
    let found = discover(&settings, &session.registry).context("discovery failed")?;
    let devices: Vec<FoundDevice> = found
        .into_iter()
        .map(|d| FoundDevice {
            uri: d.uri.to_string(),
            scheme: d.scheme,
            server: d.response.server().map(str::to_string),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("no devices found");
    } else {
        for device in &devices {
            println!("{}  ({})", device.uri, device.server.as_deref().unwrap_or("?"));
        }
    }
    Ok(())
}

// ── get / set ─────────────────────────────────────────────────────────────────

pub fn get(session: &Session, uri: Option<&str>, ids: &[String], json: bool) -> anyhow::Result<()> {
    let client = session.connect(uri)?;
    let ids: Vec<String> = if ids.is_empty() {
        client
            .core()
            .variables()
            .iter()
            .filter(|v| !v.def().is_push_only())
            .map(|v| v.id().to_string())
            .collect()
    } else {
        ids.to_vec()
    };

    let mut values = BTreeMap::new();
    for id in &ids {
        match client.get(id) {
            Ok(value) => {
                values.insert(id.clone(), Some(value));
            }
            Err(e) if ids.len() > 1 => {
                warn!(variable = %id, "no value: {e}");
                values.insert(id.clone(), None);
            }
            Err(e) => return Err(e).with_context(|| format!("cannot read '{id}'")),
        }
    }
    client.exit();

    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for id in &ids {
            match values.get(id) {
                Some(Some(value)) => println!("{id} = {value}"),
                _ => println!("{id} = (not available)"),
            }
        }
    }
    Ok(())
}

pub fn set(
    session: &Session,
    uri: Option<&str>,
    id: &str,
    text: &str,
    force: bool,
) -> anyhow::Result<()> {
    let client = session.connect(uri)?;
    let variable = client.variable(id)?;
    let value = if force {
        parse_unchecked(variable.def().domain(), text)
    } else {
        variable.def().domain().parse(text)
    }
    .with_context(|| format!("invalid value for '{id}'"))?;

    if force {
        client.force_set(id, value.clone())?;
    } else {
        client.set(id, value.clone())?;
    }

    let wanted = variable.def().domain().round(&value);
    let deadline = Instant::now() + client.core().config().get_timeout;
    let confirmed = loop {
        let current = client.value(id).ok();
        if current.as_ref() == Some(&wanted) || Instant::now() >= deadline {
            break current;
        }
        thread::sleep(Duration::from_millis(20));
    };
    client.exit();

    match confirmed {
        Some(current) if current == wanted => println!("{id} = {current}"),
        Some(current) => println!("{id} = {current} (device did not confirm {wanted})"),
        None => println!("{id}: sent {wanted}, no confirmation"),
    }
    Ok(())
}

/// Parses `text` as the domain's type without checking bounds or options.
fn parse_unchecked(domain: &Domain, text: &str) -> Result<Value, avsync::DomainError> {
    let loose = match domain {
        Domain::Integer { .. } => Domain::Integer {
            min: i64::MIN,
            max: i64::MAX,
        },
        Domain::Decimal { precision, .. } => Domain::Decimal {
            min: f64::MIN,
            max: f64::MAX,
            precision: *precision,
        },
        Domain::Options(_) => Domain::Text,
        other => other.clone(),
    };
    loose.parse(text)
}

// ── watch / serve / proxy ─────────────────────────────────────────────────────

/// Prints every event of the watched target.
struct Printer;

impl TargetObserver for Printer {
    fn on_connect(&self) {
        println!("-- connected");
    }

    fn on_disconnect(&self) {
        println!("-- disconnected");
    }

    fn on_set(&self, variable: &SharedVariable, value: &Value) {
        println!("{} = {value}", variable.id());
    }
}

pub fn watch(session: &Session, uri: Option<&str>) -> anyhow::Result<()> {
    let uri = session.target_uri(uri)?;
    let client = session
        .registry
        .new_client(&uri, session.config.target_config())
        .with_context(|| format!("cannot build a client for '{uri}'"))?;
    client.bind(Arc::new(Printer));
    client.enter()?;
    info!(%uri, "watching, Ctrl+C to stop");

    wait_for_ctrl_c()?;
    client.exit();
    Ok(())
}

pub fn serve(session: &Session, uri: &str, advertise: bool) -> anyhow::Result<()> {
    let uri = TargetUri::parse(uri).with_context(|| format!("invalid server URI '{uri}'"))?;
    let server = session
        .registry
        .new_dummy_server(&uri, session.config.target_config())
        .with_context(|| format!("cannot build a server for '{uri}'"))?;
    server.enter().with_context(|| format!("cannot start '{uri}'"))?;
    let Some(addr) = server.local_addr() else {
        bail!("'{uri}' has no listen address; use {}", server.core().scheme().server_usage());
    };
    println!("serving {} on {addr}", server.core().scheme().id());

    let responder = if advertise {
        let bind: SocketAddr = SSDP_BIND.parse()?;
        let advertisement = Advertisement::for_scheme(server.core().scheme(), addr.port());
        Some(
            start_discovery_responder(bind, advertisement, Arc::new(AtomicBool::new(true)))
                .context("cannot start the discovery responder")?,
        )
    } else {
        None
    };

    wait_for_ctrl_c()?;
    if let Some(responder) = responder {
        responder.stop();
    }
    server.exit();
    Ok(())
}

pub fn proxy(session: &Session, upstream: &str, listen: &str) -> anyhow::Result<()> {
    let upstream =
        TargetUri::parse(upstream).with_context(|| format!("invalid upstream URI '{upstream}'"))?;
    let listen = TargetUri::parse(listen).with_context(|| format!("invalid listen URI '{listen}'"))?;
    let proxy = session
        .registry
        .new_proxy(&upstream, &listen, session.config.target_config())
        .context("cannot build the proxy")?;
    proxy.enter().context("cannot start the proxy")?;
    match proxy.server().local_addr() {
        Some(addr) => println!("proxying {upstream} on {addr}"),
        None => println!("proxying {upstream} in-process"),
    }

    wait_for_ctrl_c()?;
    proxy.exit();
    Ok(())
}

/// Blocks the calling thread until Ctrl+C.
fn wait_for_ctrl_c() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot create the signal runtime")?;
    rt.block_on(tokio::signal::ctrl_c())
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C, shutting down");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
