//! Accept loop: pairs terminated sessions with upstream connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use pskgate_transport::{PskListener, PskSession};

use super::registry::{SessionHandle, SessionRegistry};
use super::relay_engine::relay;

/// Connect timeout for upstream dials.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Sessions handed over by the transport.
    pub sessions_accepted: AtomicU64,
    /// Stale sessions evicted on identity collision.
    pub sessions_evicted: AtomicU64,
    /// Sessions dropped because the upstream dial failed.
    pub dial_failures: AtomicU64,
    /// Relays currently running.
    pub relays_active: AtomicU64,
    /// Bytes forwarded client-to-upstream.
    pub bytes_to_upstream: AtomicU64,
    /// Bytes forwarded upstream-to-client.
    pub bytes_to_client: AtomicU64,
}

/// Drives the relay: accepts sessions, maintains the registry, dials the
/// upstream, and runs one relay task per session.
pub struct RelayServer {
    registry: Arc<SessionRegistry>,
    stats: Arc<RelayStats>,
    upstream_addr: String,
    connect_timeout: Duration,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Create a server relaying to `upstream_addr`.
    pub fn new(upstream_addr: String, shutdown: CancellationToken) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            stats: Arc::new(RelayStats::default()),
            upstream_addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown,
        }
    }

    /// The session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Relay counters.
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown or until the listener stops.
    ///
    /// Each accepted session is handled on its own task; acceptance never
    /// waits on a relay.
    pub async fn run(&self, listener: &mut PskListener) {
        info!(upstream = %self.upstream_addr, "relay server started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                session = listener.accept() => match session {
                    Some(session) => self.handle_session(session),
                    None => break,
                }
            }
        }

        info!("relay server stopped");
    }

    /// Register, dial, and spawn the relay for one session.
    fn handle_session(&self, session: PskSession) {
        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let upstream_addr = self.upstream_addr.clone();
        let connect_timeout = self.connect_timeout;
        let cancel = self.shutdown.child_token();

        let identity = session.identity().to_vec();
        let peer_addr = session.peer_addr();
        let identity_label = String::from_utf8_lossy(&identity).into_owned();

        let span = tracing::info_span!("session", peer = %peer_addr, identity = %identity_label);

        tokio::spawn(
            async move {
                stats.sessions_accepted.fetch_add(1, Ordering::Relaxed);

                let handle = SessionHandle::new(cancel.clone(), peer_addr);
                let session_id = handle.id();

                if let Some(stale) = registry.register(identity.clone(), handle).await {
                    info!(stale_id = stale.id(), "evicting stale session");
                    stale.close();
                    stats.sessions_evicted.fetch_add(1, Ordering::Relaxed);
                }

                let upstream =
                    match timeout(connect_timeout, TcpStream::connect(upstream_addr.as_str())).await
                    {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            warn!(upstream = %upstream_addr, error = %e, "upstream dial failed");
                            stats.dial_failures.fetch_add(1, Ordering::Relaxed);
                            registry.remove(&identity, session_id).await;
                            return;
                        }
                        Err(_) => {
                            warn!(upstream = %upstream_addr, "upstream dial timed out");
                            stats.dial_failures.fetch_add(1, Ordering::Relaxed);
                            registry.remove(&identity, session_id).await;
                            return;
                        }
                    };

                stats.relays_active.fetch_add(1, Ordering::Relaxed);
                let (to_upstream, to_client) = relay(session, upstream, cancel).await;
                stats.relays_active.fetch_sub(1, Ordering::Relaxed);

                stats
                    .bytes_to_upstream
                    .fetch_add(to_upstream, Ordering::Relaxed);
                stats
                    .bytes_to_client
                    .fetch_add(to_client, Ordering::Relaxed);

                registry.remove(&identity, session_id).await;

                debug!(
                    bytes_to_upstream = to_upstream,
                    bytes_to_client = to_client,
                    "session closed"
                );
            }
            .instrument(span),
        );
    }
}
