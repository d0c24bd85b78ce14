//! Client side of the handshake, used by tests and operator smoke checks.

use std::net::SocketAddr;

use rand::RngCore;
use tokio::net::TcpStream;
use tracing::debug;

use crate::frame::{parse_server_hello, read_frame, write_frame, ClientHello, RANDOM_LEN};
use crate::record::{
    direction_key, OpenState, SealState, CLIENT_FINISHED, LABEL_C2S, LABEL_S2C, SERVER_FINISHED,
};
use crate::session::PskSession;
use crate::TransportError;

/// Connect and handshake with the given identity and key.
pub async fn connect(
    addr: SocketAddr,
    identity: &[u8],
    psk: &[u8],
) -> Result<PskSession, TransportError> {
    let mut stream = TcpStream::connect(addr).await?;
    let peer_addr = stream.peer_addr()?;

    let mut client_random = [0u8; RANDOM_LEN];
    rand::rng().fill_bytes(&mut client_random);

    let hello = ClientHello {
        identity: identity.to_vec(),
        random: client_random,
    };
    write_frame(&mut stream, &hello.encode()).await?;

    let payload = read_frame(&mut stream)
        .await?
        .ok_or(TransportError::ClosedDuringHandshake)?;
    let server_random = parse_server_hello(&payload)?;

    let mut seal = SealState::new(direction_key(
        psk,
        &client_random,
        &server_random,
        LABEL_C2S,
    ));
    let mut open = OpenState::new(direction_key(
        psk,
        &client_random,
        &server_random,
        LABEL_S2C,
    ));

    let finished = seal.seal(CLIENT_FINISHED)?;
    write_frame(&mut stream, &finished).await?;

    let ciphertext = read_frame(&mut stream)
        .await?
        .ok_or(TransportError::ClosedDuringHandshake)?;
    if open.open(&ciphertext)? != SERVER_FINISHED {
        return Err(TransportError::AuthFailed);
    }

    debug!(peer = %peer_addr, "connected");

    Ok(PskSession::new(
        identity.to_vec(),
        peer_addr,
        stream,
        seal,
        open,
    ))
}
