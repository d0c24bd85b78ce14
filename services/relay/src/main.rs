//! pskgate relay
//!
//! Terminates encrypted, PSK-authenticated client sessions and relays the
//! decrypted byte stream to a single plaintext upstream endpoint.
//!
//! This binary:
//! - Selects one key-resolution strategy (table, REST, or external command)
//! - Accepts sessions whose handshake the transport already completed
//! - Evicts stale sessions when an identity reconnects
//! - Runs one bidirectional relay per session

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pskgate_relay::{Config, RelayServer};
use pskgate_transport::{AcceptorConfig, PskListener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting pskgate relay");

    let resolver = config.build_resolver()?;
    info!(
        strategy = resolver.strategy(),
        bind = %config.bind,
        upstream = %config.connect,
        "configuration loaded"
    );

    // Root cancellation scope: cancelled exactly once at shutdown, aborting
    // all in-flight handshakes and running relays.
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            trigger.cancel();
        }
    });

    let acceptor_config = AcceptorConfig {
        handshake_timeout: config.handshake_timeout(),
        shutdown: shutdown.clone(),
        ..Default::default()
    };

    let mut listener = PskListener::bind(config.bind, Arc::new(resolver), acceptor_config)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(bind = %listener.local_addr(), "listener bound");

    let server = RelayServer::new(config.connect.clone(), shutdown);
    server.run(&mut listener).await;

    info!("relay stopped");
    Ok(())
}
