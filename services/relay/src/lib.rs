pub mod config;
pub mod proxy;

pub use config::Config;
pub use proxy::{relay, RelayServer, RelayStats, SessionHandle, SessionRegistry};
