//! Bidirectional relay between a terminated session and its upstream.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pskgate_transport::PskSession;

/// Read buffer size for the upstream-to-client direction.
const READ_BUFFER_SIZE: usize = 8192;

/// Pump bytes between a session and its upstream until either side fails.
///
/// The two directions are polled concurrently; the first to hit
/// end-of-stream, a read error, or a write error ends the whole relay, as
/// does cancellation of the session token (eviction or shutdown). There is
/// no half-duplex continuation: once one leg breaks the pairing is assumed
/// unrecoverable and both connections are closed before returning.
///
/// Returns (bytes forwarded to upstream, bytes forwarded to client).
pub async fn relay(
    session: PskSession,
    upstream: TcpStream,
    cancel: CancellationToken,
) -> (u64, u64) {
    let (mut session_read, mut session_write) = session.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let mut to_upstream = 0u64;
    let mut to_client = 0u64;

    let client_to_upstream = async {
        loop {
            match session_read.read_record().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = upstream_write.write_all(&chunk).await {
                        debug!(error = %e, "upstream write failed");
                        break;
                    }
                    to_upstream += chunk.len() as u64;
                }
                Ok(None) => {
                    debug!("client closed stream");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "client read failed");
                    break;
                }
            }
        }
    };

    let upstream_to_client = async {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match upstream_read.read(&mut buf).await {
                Ok(0) => {
                    debug!("upstream closed stream");
                    break;
                }
                Ok(n) => {
                    if let Err(e) = session_write.write_record(&buf[..n]).await {
                        debug!(error = %e, "client write failed");
                        break;
                    }
                    to_client += n as u64;
                }
                Err(e) => {
                    debug!(error = %e, "upstream read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
        _ = cancel.cancelled() => {
            debug!("relay cancelled");
        }
    }

    // Both write halves are shut down regardless of which direction ended
    // the relay; dropping the halves closes the sockets.
    let _ = session_write.shutdown().await;
    let _ = upstream_write.shutdown().await;

    (to_upstream, to_client)
}
