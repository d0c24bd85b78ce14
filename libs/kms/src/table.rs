//! Static table strategy: identity to key, loaded once from a file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::{identity_label, KmsError};

/// In-memory identity-to-key table.
///
/// Rows are `identity,hex-key`; blank lines and `#` comments are skipped.
/// The identity is everything before the first comma and is matched as raw
/// bytes. A row that does not parse, including a key that is not clean hex,
/// aborts the load — a half-usable key table is a configuration error.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    keys: HashMap<Vec<u8>, Vec<u8>>,
}

impl KeyTable {
    /// Load a table from a delimited file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KmsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| KmsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse table contents.
    pub fn parse(content: &str) -> Result<Self, KmsError> {
        let mut keys = HashMap::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((identity, hex_key)) = line.split_once(',') else {
                return Err(KmsError::MalformedRow {
                    line: idx + 1,
                    reason: "expected identity,hex-key".to_string(),
                });
            };

            let key = hex::decode(hex_key.trim()).map_err(|e| KmsError::MalformedRow {
                line: idx + 1,
                reason: format!("invalid hex key: {e}"),
            })?;

            keys.insert(identity.as_bytes().to_vec(), key);
        }

        Ok(Self { keys })
    }

    /// Number of identities in the table.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Look up an identity.
    pub fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>> {
        match self.keys.get(identity) {
            Some(key) => {
                debug!(identity = %identity_label(identity), "identity found");
                Some(key.clone())
            }
            None => {
                warn!(identity = %identity_label(identity), "identity not found");
                None
            }
        }
    }
}
