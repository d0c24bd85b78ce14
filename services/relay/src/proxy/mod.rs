//! Session relay machinery.
//!
//! This module provides:
//! - the identity-indexed session registry with stale-session eviction
//! - the bidirectional relay engine
//! - the accept loop that pairs terminated sessions with upstream
//!   connections
//!
//! ## Architecture
//!
//! ```text
//! Client ==(encrypted)==> PskListener -> RelayServer -> SessionRegistry
//!                                             |
//!                                       upstream dial
//!                                             |
//!                                        relay engine  <-> upstream (plaintext)
//! ```

mod acceptor;
mod registry;
mod relay_engine;

pub use acceptor::{RelayServer, RelayStats, DEFAULT_CONNECT_TIMEOUT};
pub use registry::{SessionHandle, SessionRegistry};
pub use relay_engine::relay;
