//! Established sessions and their read/write halves.

use std::io;
use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::frame::{read_frame, write_frame};
use crate::record::{OpenState, SealState, MAX_RECORD_PLAINTEXT};
use crate::TransportError;

/// One terminated secure connection.
///
/// Created only by a completed handshake; owns the socket and both cipher
/// directions. Dropping the session closes the connection.
pub struct PskSession {
    identity: Vec<u8>,
    peer_addr: SocketAddr,
    stream: TcpStream,
    seal: SealState,
    open: OpenState,
}

impl PskSession {
    pub(crate) fn new(
        identity: Vec<u8>,
        peer_addr: SocketAddr,
        stream: TcpStream,
        seal: SealState,
        open: OpenState,
    ) -> Self {
        Self {
            identity,
            peer_addr,
            stream,
            seal,
            open,
        }
    }

    /// The identity the peer presented during the handshake.
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (PskReadHalf, PskWriteHalf) {
        let (read, write) = self.stream.into_split();
        (
            PskReadHalf {
                stream: read,
                open: self.open,
            },
            PskWriteHalf {
                stream: write,
                seal: self.seal,
            },
        )
    }
}

impl std::fmt::Debug for PskSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskSession")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Decrypting read half of a session.
pub struct PskReadHalf {
    stream: OwnedReadHalf,
    open: OpenState,
}

impl PskReadHalf {
    /// Read and decrypt the next record.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream.
    pub async fn read_record(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match read_frame(&mut self.stream).await? {
            Some(ciphertext) => Ok(Some(self.open.open(&ciphertext)?)),
            None => Ok(None),
        }
    }
}

/// Encrypting write half of a session.
pub struct PskWriteHalf {
    stream: OwnedWriteHalf,
    seal: SealState,
}

impl PskWriteHalf {
    /// Encrypt and write `plaintext`, splitting into records as needed.
    pub async fn write_record(&mut self, plaintext: &[u8]) -> Result<(), TransportError> {
        for chunk in plaintext.chunks(MAX_RECORD_PLAINTEXT) {
            let sealed = self.seal.seal(chunk)?;
            write_frame(&mut self.stream, &sealed).await?;
        }
        Ok(())
    }

    /// Shut down the write side of the underlying socket.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown().await
    }
}
