//! Record layer: key schedule and per-direction AEAD state.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::frame::{MAGIC, MAX_FRAME_LEN, VERSION};
use crate::TransportError;

/// AEAD tag size.
pub(crate) const TAG_LEN: usize = 16;

/// Largest plaintext that fits one record frame.
pub(crate) const MAX_RECORD_PLAINTEXT: usize = MAX_FRAME_LEN - TAG_LEN;

/// Key-schedule label, client-to-server direction.
pub(crate) const LABEL_C2S: &[u8] = b"pskgate v1 c2s";

/// Key-schedule label, server-to-client direction.
pub(crate) const LABEL_S2C: &[u8] = b"pskgate v1 s2c";

/// Finished payload sent by the client.
pub(crate) const CLIENT_FINISHED: &[u8] = b"pskgate finished client";

/// Finished payload sent by the server.
pub(crate) const SERVER_FINISHED: &[u8] = b"pskgate finished server";

const NONCE_LEN: usize = 12;
const RECORD_AAD: &[u8] = &[MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], VERSION];

/// Derive one direction's record key from the PSK and both hello randoms.
pub(crate) fn direction_key(
    psk: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    label: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(psk);
    hasher.update(client_random);
    hasher.update(server_random);
    hasher.update(label);
    hasher.finalize().into()
}

/// The record nonce is the big-endian record counter in the low 8 bytes.
fn record_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Sealing state for one direction (our writes to the peer).
pub(crate) struct SealState {
    cipher: Aes256Gcm,
    counter: u64,
}

impl SealState {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            counter: 0,
        }
    }

    pub(crate) fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let nonce = record_nonce(self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(TransportError::CounterExhausted)?;

        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: RECORD_AAD,
                },
            )
            .map_err(|_| TransportError::Cipher)
    }
}

/// Opening state for one direction (the peer's writes to us).
pub(crate) struct OpenState {
    cipher: Aes256Gcm,
    counter: u64,
}

impl OpenState {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            counter: 0,
        }
    }

    pub(crate) fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let nonce = record_nonce(self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(TransportError::CounterExhausted)?;

        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: RECORD_AAD,
                },
            )
            .map_err(|_| TransportError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pair() -> ([u8; 32], [u8; 32]) {
        let psk = b"test-psk";
        let cr = [1u8; 32];
        let sr = [2u8; 32];
        (
            direction_key(psk, &cr, &sr, LABEL_C2S),
            direction_key(psk, &cr, &sr, LABEL_S2C),
        )
    }

    #[test]
    fn test_direction_keys_differ() {
        let (c2s, s2c) = key_pair();
        assert_ne!(c2s, s2c);
    }

    #[test]
    fn test_seal_open() {
        let (c2s, _) = key_pair();
        let mut seal = SealState::new(c2s);
        let mut open = OpenState::new(c2s);

        let first = seal.seal(b"alpha").unwrap();
        let second = seal.seal(b"beta").unwrap();
        assert_eq!(open.open(&first).unwrap(), b"alpha");
        assert_eq!(open.open(&second).unwrap(), b"beta");
    }

    #[test]
    fn test_tampered_record_rejected() {
        let (c2s, _) = key_pair();
        let mut seal = SealState::new(c2s);
        let mut open = OpenState::new(c2s);

        let mut sealed = seal.seal(b"alpha").unwrap();
        sealed[0] ^= 0x01;
        assert!(matches!(
            open.open(&sealed),
            Err(TransportError::AuthFailed)
        ));
    }

    #[test]
    fn test_out_of_order_record_rejected() {
        let (c2s, _) = key_pair();
        let mut seal = SealState::new(c2s);
        let mut open = OpenState::new(c2s);

        let _skipped = seal.seal(b"alpha").unwrap();
        let second = seal.seal(b"beta").unwrap();

        // The opener is still at counter 0, so the nonce will not line up.
        assert!(matches!(
            open.open(&second),
            Err(TransportError::AuthFailed)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (c2s, s2c) = key_pair();
        let mut seal = SealState::new(c2s);
        let mut open = OpenState::new(s2c);

        let sealed = seal.seal(b"alpha").unwrap();
        assert!(open.open(&sealed).is_err());
    }
}
