//! Relay configuration.
//!
//! Flags with environment fallbacks. Exactly one key-resolution strategy
//! must be selected; clap enforces the group so a missing or doubled
//! strategy exits non-zero before anything binds.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::info;

use pskgate_kms::{ExecLookup, KeyResolver, KeyTable, RestConfig, RestLookup};

/// PSK-terminating relay: terminates encrypted pre-shared-key sessions and
/// forwards the plaintext stream to a single upstream endpoint.
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
#[command(group = ArgGroup::new("kms").required(true).multiple(false))]
pub struct Config {
    /// Local ip:port to bind.
    #[arg(long, env = "PSKGATE_BIND", default_value = "0.0.0.0:14881")]
    pub bind: SocketAddr,

    /// Upstream plaintext host:port.
    #[arg(long, env = "PSKGATE_CONNECT")]
    pub connect: String,

    /// Identity,hex-key file (table strategy).
    #[arg(long, env = "PSKGATE_PSK_FILE", group = "kms")]
    pub psk_file: Option<PathBuf>,

    /// Key lookup base URL, may embed one fixed ?key=value pair (REST strategy).
    #[arg(long, env = "PSKGATE_PSK_URL", group = "kms")]
    pub psk_url: Option<String>,

    /// External command invoked as `command <identity>`; stdout is the
    /// hex-encoded key (exec strategy).
    #[arg(long, env = "PSKGATE_PSK_CMD", group = "kms")]
    pub psk_cmd: Option<PathBuf>,

    /// Extra Key:Value header for REST lookups (repeatable).
    #[arg(long = "rest-header", env = "PSKGATE_REST_HEADERS", value_delimiter = ',')]
    pub rest_headers: Vec<String>,

    /// Query parameter name carrying the identity in REST lookups.
    #[arg(long, env = "PSKGATE_ID_QUERY_KEY", default_value = "pskId")]
    pub id_query_key: String,

    /// Fixed prefix prepended to the identity in the query value.
    #[arg(long, env = "PSKGATE_ID_QUERY_VAL_PREFIX", default_value = "")]
    pub id_query_val_prefix: String,

    /// Handshake timeout in seconds.
    #[arg(long, env = "PSKGATE_HANDSHAKE_TIMEOUT_SECS", default_value_t = 30)]
    pub handshake_timeout_secs: u64,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, env = "PSKGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Handshake timeout as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Build the configured key-resolution strategy.
    ///
    /// Any error here is a configuration error and aborts startup.
    pub fn build_resolver(&self) -> Result<KeyResolver> {
        if let Some(path) = &self.psk_file {
            let table = KeyTable::load(path)
                .with_context(|| format!("failed to load key file {}", path.display()))?;
            info!(path = %path.display(), entries = table.len(), "loaded key table");
            return Ok(KeyResolver::Table(table));
        }

        if let Some(url) = &self.psk_url {
            let mut rest = RestConfig::new(url.clone());
            rest.id_query_key = self.id_query_key.clone();
            rest.id_query_val_prefix = self.id_query_val_prefix.clone();
            for raw in &self.rest_headers {
                rest.headers.push(parse_header(raw)?);
            }
            let lookup = RestLookup::new(rest).context("invalid REST lookup configuration")?;
            info!(url = %url, "using REST key lookup");
            return Ok(KeyResolver::Rest(lookup));
        }

        if let Some(command) = &self.psk_cmd {
            info!(command = %command.display(), "using external key command");
            return Ok(KeyResolver::Exec(ExecLookup::new(command.clone())));
        }

        // clap's group guarantees one strategy; this is only reachable when
        // the struct is constructed by hand.
        anyhow::bail!("no key resolution strategy configured")
    }
}

/// Parse a `Key:Value` header flag.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header '{raw}' is not Key:Value"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}
