//! PSK-authenticated encrypted stream transport.
//!
//! This library terminates encrypted sessions for the relay: it runs a
//! pre-shared-key handshake over TCP, derives per-direction AEAD keys, and
//! exposes the decrypted byte stream plus the identity the client presented.
//!
//! # Protocol (version 1)
//!
//! Every message on the wire is a frame: a big-endian `u16` payload length
//! followed by the payload. The handshake is two flights:
//!
//! ```text
//! Client                                Server
//!   | ClientHello (id, random) ---------> |  resolve key for id
//!   | <--------------- ServerHello (random)
//!   | Finished (encrypted) -------------> |  proves client holds the key
//!   | <------------- Finished (encrypted) |  proves server holds the key
//!   | application records <------------>  |
//! ```
//!
//! Per-direction keys are `SHA-256(psk || client_random || server_random ||
//! label)`; records are AES-256-GCM with a per-direction record counter as
//! the nonce. Key resolution happens mid-handshake through the caller's
//! [`PskResolver`]; a failed resolution aborts the handshake before any
//! application byte flows.
//!
//! Handshakes run in background tasks bounded by a timeout and a
//! process-wide cancellation token, so [`PskListener::accept`] only ever
//! yields fully established sessions.

use std::io;

use async_trait::async_trait;
use thiserror::Error;

mod connector;
mod frame;
mod listener;
mod record;
mod session;

pub use connector::connect;
pub use listener::{AcceptorConfig, PskListener, DEFAULT_HANDSHAKE_TIMEOUT};
pub use session::{PskReadHalf, PskSession, PskWriteHalf};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame length prefix exceeded the protocol limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer closed the connection mid-handshake.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// A handshake message did not parse.
    #[error("malformed {0} message")]
    Malformed(&'static str),

    /// The peer spoke a protocol version we do not support.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The presented identity exceeded the protocol limit.
    #[error("identity of {len} bytes exceeds limit of {max}")]
    IdentityTooLong { len: usize, max: usize },

    /// Key resolution returned no key for the presented identity.
    #[error("no key found for presented identity")]
    UnknownIdentity,

    /// Record decryption or Finished verification failed.
    #[error("authentication failed")]
    AuthFailed,

    /// Record encryption failed.
    #[error("cipher failure")]
    Cipher,

    /// The per-direction record counter was exhausted.
    #[error("record counter exhausted")]
    CounterExhausted,
}

/// Key lookup callback invoked during the handshake.
///
/// Implementations receive the identity exactly as the client presented it
/// (arbitrary bytes, attacker-controlled, pre-authentication) and return the
/// symmetric key, or `None` to reject the handshake.
#[async_trait]
pub trait PskResolver: Send + Sync {
    async fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>>;
}
