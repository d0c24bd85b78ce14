//! Key resolution for pskgate.
//!
//! A [`KeyResolver`] answers one question: given the identity a client
//! presented during its handshake, what is its symmetric key? Exactly one
//! strategy is active per process, chosen at startup:
//!
//! - [`KeyTable`]: in-memory map loaded once from a delimited file
//! - [`RestLookup`]: one HTTP GET per resolution against a configured URL
//! - [`ExecLookup`]: invoke an external command, stdout is the key
//!
//! Identities are opaque, attacker-controlled bytes presented before
//! authentication; every strategy tolerates arbitrary contents. Lookup
//! failures of any kind (absent identity, network error, non-success
//! response, malformed hex, failed process) resolve to `None` and a log
//! line — they fail the client's handshake, never the process.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use pskgate_transport::PskResolver;

mod exec;
mod rest;
mod table;

pub use exec::ExecLookup;
pub use rest::{RestConfig, RestLookup};
pub use table::KeyTable;

/// Configuration-time errors. All of these abort startup; nothing here is
/// produced on the per-handshake lookup path.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The key file could not be read.
    #[error("failed to read key file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    /// A key file row did not parse.
    #[error("malformed key file row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    /// Invalid REST lookup configuration.
    #[error("invalid lookup configuration: {0}")]
    Config(String),
}

/// The active key-resolution strategy.
pub enum KeyResolver {
    Table(KeyTable),
    Rest(RestLookup),
    Exec(ExecLookup),
}

impl KeyResolver {
    /// Resolve an identity to its key.
    pub async fn resolve(&self, identity: &[u8]) -> Option<Vec<u8>> {
        match self {
            KeyResolver::Table(table) => table.lookup(identity),
            KeyResolver::Rest(rest) => rest.lookup(identity).await,
            KeyResolver::Exec(exec) => exec.lookup(identity).await,
        }
    }

    /// Strategy name for startup logging.
    pub fn strategy(&self) -> &'static str {
        match self {
            KeyResolver::Table(_) => "table",
            KeyResolver::Rest(_) => "rest",
            KeyResolver::Exec(_) => "exec",
        }
    }
}

#[async_trait]
impl PskResolver for KeyResolver {
    async fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>> {
        self.resolve(identity).await
    }
}

/// Render an identity for log output.
///
/// Identities are arbitrary bytes; logs get the lossy UTF-8 rendering.
pub(crate) fn identity_label(identity: &[u8]) -> String {
    String::from_utf8_lossy(identity).into_owned()
}
