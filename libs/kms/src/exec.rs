//! External-command strategy: `command <identity>`, stdout is the key.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::identity_label;

/// Resolves keys by invoking an external command.
///
/// The identity is passed as a single raw-byte argument, so non-UTF-8
/// identities reach the command intact. Captured stdout is trimmed of
/// trailing ASCII whitespace (key scripts usually end with a newline) and
/// hex-decoded.
pub struct ExecLookup {
    command: PathBuf,
}

impl ExecLookup {
    pub fn new(command: PathBuf) -> Self {
        Self { command }
    }

    /// Resolve an identity by running the command.
    pub async fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>> {
        let output = match Command::new(&self.command)
            .arg(OsStr::from_bytes(identity))
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    command = %self.command.display(),
                    error = %e,
                    "key command failed to run"
                );
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                command = %self.command.display(),
                code = ?output.status.code(),
                "key command exited non-zero"
            );
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match hex::decode(stdout.trim()) {
            Ok(key) if !key.is_empty() => {
                debug!(identity = %identity_label(identity), "identity resolved");
                Some(key)
            }
            Ok(_) => {
                warn!(identity = %identity_label(identity), "key command returned empty key");
                None
            }
            Err(e) => {
                warn!(error = %e, "key command returned malformed hex");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    fn write_script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("kms.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_stdout_with_trailing_newline_decodes() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo aabbcc");

        let lookup = ExecLookup::new(script);
        assert_eq!(lookup.lookup(b"id1").await, Some(vec![0xaa, 0xbb, 0xcc]));
    }

    #[tokio::test]
    async fn test_identity_is_passed_as_argument() {
        let dir = TempDir::new().unwrap();
        // Echo the hex key only for the expected identity.
        let script = write_script(&dir, "[ \"$1\" = \"device-1\" ] && echo 0102 || exit 1");

        let lookup = ExecLookup::new(script);
        assert_eq!(lookup.lookup(b"device-1").await, Some(vec![0x01, 0x02]));
        assert_eq!(lookup.lookup(b"device-2").await, None);
    }

    #[tokio::test]
    async fn test_non_zero_exit_resolves_to_not_found() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo aabbcc; exit 3");

        let lookup = ExecLookup::new(script);
        assert_eq!(lookup.lookup(b"id1").await, None);
    }

    #[tokio::test]
    async fn test_malformed_stdout_resolves_to_not_found() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo zzzz");

        let lookup = ExecLookup::new(script);
        assert_eq!(lookup.lookup(b"id1").await, None);
    }

    #[tokio::test]
    async fn test_missing_command_resolves_to_not_found() {
        let lookup = ExecLookup::new(PathBuf::from("/nonexistent/kms"));
        assert_eq!(lookup.lookup(b"id1").await, None);
    }
}
