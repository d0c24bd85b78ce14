//! Listener: accepts TCP connections and runs handshakes off the accept path.
//!
//! Handshakes run in background tasks so a slow or stalled client cannot
//! block acceptance of new connections. Each handshake is bounded by the
//! configured timeout and aborted when the process-wide cancellation token
//! fires; [`PskListener::accept`] therefore only ever yields sessions whose
//! handshake already completed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

use crate::frame::{read_frame, write_frame, ClientHello, RANDOM_LEN};
use crate::record::{
    direction_key, OpenState, SealState, CLIENT_FINISHED, LABEL_C2S, LABEL_S2C, SERVER_FINISHED,
};
use crate::session::PskSession;
use crate::{PskResolver, TransportError};

/// Default bound on a single handshake attempt.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the established-session queue.
const DEFAULT_MAX_PENDING: usize = 64;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Bound on a single handshake attempt.
    pub handshake_timeout: Duration,
    /// Process-wide shutdown token; cancelling it aborts all in-flight
    /// handshakes and stops the listener.
    pub shutdown: CancellationToken,
    /// Capacity of the established-session queue.
    pub max_pending: usize,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown: CancellationToken::new(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// Accepts PSK-authenticated sessions.
pub struct PskListener {
    local_addr: SocketAddr,
    sessions: mpsc::Receiver<PskSession>,
}

impl PskListener {
    /// Bind and start accepting in the background.
    pub async fn bind(
        addr: SocketAddr,
        resolver: Arc<dyn PskResolver>,
        config: AcceptorConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(config.max_pending);

        tokio::spawn(
            accept_loop(listener, resolver, config, tx)
                .instrument(tracing::info_span!("acceptor", bind = %local_addr)),
        );

        Ok(Self {
            local_addr,
            sessions: rx,
        })
    }

    /// The local address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next fully handshaken session.
    ///
    /// Returns `None` once the listener has stopped (shutdown or socket
    /// error) and all queued sessions have been drained.
    pub async fn accept(&mut self) -> Option<PskSession> {
        self.sessions.recv().await
    }
}

async fn accept_loop(
    listener: TcpListener,
    resolver: Arc<dyn PskResolver>,
    config: AcceptorConfig,
    sessions: mpsc::Sender<PskSession>,
) {
    loop {
        tokio::select! {
            _ = config.shutdown.cancelled() => {
                debug!("acceptor shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let resolver = Arc::clone(&resolver);
                    let sessions = sessions.clone();
                    let handshake_timeout = config.handshake_timeout;
                    let shutdown = config.shutdown.clone();

                    tokio::spawn(
                        async move {
                            let handshake = server_handshake(stream, peer_addr, resolver.as_ref());
                            tokio::select! {
                                _ = shutdown.cancelled() => {
                                    debug!("handshake aborted by shutdown");
                                }
                                outcome = tokio::time::timeout(handshake_timeout, handshake) => {
                                    match outcome {
                                        Ok(Ok(session)) => {
                                            let _ = sessions.send(session).await;
                                        }
                                        Ok(Err(e)) => {
                                            warn!(error = %e, "handshake failed");
                                        }
                                        Err(_) => {
                                            warn!("handshake timed out");
                                        }
                                    }
                                }
                            }
                        }
                        .instrument(tracing::info_span!("handshake", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                    // Avoid a tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Run the server side of the handshake on a fresh TCP connection.
async fn server_handshake(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    resolver: &dyn PskResolver,
) -> Result<PskSession, TransportError> {
    let payload = read_frame(&mut stream)
        .await?
        .ok_or(TransportError::ClosedDuringHandshake)?;
    let hello = ClientHello::parse(&payload)?;

    let psk = resolver
        .lookup(&hello.identity)
        .await
        .ok_or(TransportError::UnknownIdentity)?;

    let mut server_random = [0u8; RANDOM_LEN];
    rand::rng().fill_bytes(&mut server_random);
    write_frame(&mut stream, &server_random).await?;

    let mut open = OpenState::new(direction_key(
        &psk,
        &hello.random,
        &server_random,
        LABEL_C2S,
    ));
    let mut seal = SealState::new(direction_key(
        &psk,
        &hello.random,
        &server_random,
        LABEL_S2C,
    ));

    // The client's Finished record authenticates it: decryption only
    // succeeds if it derived the same keys from the same PSK.
    let ciphertext = read_frame(&mut stream)
        .await?
        .ok_or(TransportError::ClosedDuringHandshake)?;
    if open.open(&ciphertext)? != CLIENT_FINISHED {
        return Err(TransportError::AuthFailed);
    }

    let finished = seal.seal(SERVER_FINISHED)?;
    write_frame(&mut stream, &finished).await?;

    debug!(identity = %String::from_utf8_lossy(&hello.identity), "handshake complete");

    Ok(PskSession::new(
        hello.identity,
        peer_addr,
        stream,
        seal,
        open,
    ))
}
