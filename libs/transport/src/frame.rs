//! Wire framing and handshake messages.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Protocol magic, first bytes of every ClientHello.
pub(crate) const MAGIC: [u8; 4] = *b"PSKG";

/// Protocol version.
pub(crate) const VERSION: u8 = 1;

/// Maximum frame payload size.
pub(crate) const MAX_FRAME_LEN: usize = 16 * 1024;

/// Maximum identity length accepted in a ClientHello.
pub(crate) const MAX_IDENTITY_LEN: usize = 4096;

/// Size of the hello randoms.
pub(crate) const RANDOM_LEN: usize = 32;

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end-of-stream (EOF before the length
/// prefix); EOF inside a frame is an error.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    let n = reader.read(&mut len_buf[..1]).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(payload.len() <= MAX_FRAME_LEN);
    writer.write_all(&(payload.len() as u16).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// First handshake flight: identity plus client random.
pub(crate) struct ClientHello {
    pub identity: Vec<u8>,
    pub random: [u8; RANDOM_LEN],
}

impl ClientHello {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 1 + 2 + self.identity.len() + RANDOM_LEN);
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&(self.identity.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.identity);
        out.extend_from_slice(&self.random);
        out
    }

    pub(crate) fn parse(payload: &[u8]) -> Result<Self, TransportError> {
        if payload.len() < 4 + 1 + 2 {
            return Err(TransportError::Malformed("ClientHello"));
        }
        if payload[..4] != MAGIC {
            return Err(TransportError::Malformed("ClientHello"));
        }
        if payload[4] != VERSION {
            return Err(TransportError::UnsupportedVersion(payload[4]));
        }

        let id_len = u16::from_be_bytes([payload[5], payload[6]]) as usize;
        if id_len > MAX_IDENTITY_LEN {
            return Err(TransportError::IdentityTooLong {
                len: id_len,
                max: MAX_IDENTITY_LEN,
            });
        }
        if payload.len() != 4 + 1 + 2 + id_len + RANDOM_LEN {
            return Err(TransportError::Malformed("ClientHello"));
        }

        let identity = payload[7..7 + id_len].to_vec();
        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(&payload[7 + id_len..]);

        Ok(Self { identity, random })
    }
}

/// Second handshake flight: server random.
pub(crate) fn parse_server_hello(payload: &[u8]) -> Result<[u8; RANDOM_LEN], TransportError> {
    let random: [u8; RANDOM_LEN] = payload
        .try_into()
        .map_err(|_| TransportError::Malformed("ServerHello"))?;
    Ok(random)
}
