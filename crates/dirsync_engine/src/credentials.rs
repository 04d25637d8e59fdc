//! Local bind secret management.
//!
//! The secret lives in a single-line file `rootpw "<secret>"` that the
//! directory server includes in its configuration. Rotating it therefore
//! only takes effect after a server restart.

use crate::files;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Reads, validates and regenerates the local bind secret.
#[derive(Debug, Clone)]
pub struct CredentialRotator {
    path: PathBuf,
    length: usize,
}

impl CredentialRotator {
    /// Creates a rotator for the secret file at `path`.
    pub fn new(path: impl Into<PathBuf>, length: usize) -> Self {
        Self {
            path: path.into(),
            length: length.max(8),
        }
    }

    /// Path of the secret file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current secret, or `None` if it is missing or invalid.
    pub fn current(&self) -> Option<Zeroizing<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => Zeroizing::new(content),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "cannot read bind secret");
                }
                return None;
            }
        };
        let secret = parse_secret(&content);
        if secret.is_none() {
            warn!(path = %self.path.display(), "bind secret file is malformed");
        }
        secret.map(|s| Zeroizing::new(s.to_string()))
    }

    /// Generates and persists a new secret.
    ///
    /// The new secret is returned even if it could not be written; the
    /// failure is logged and the next bind will report it.
    pub fn rotate(&self) -> Zeroizing<String> {
        let secret: Zeroizing<String> = Zeroizing::new(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(self.length)
                .map(char::from)
                .collect(),
        );
        let line = Zeroizing::new(format!("rootpw \"{}\"\n", secret.as_str()));
        match files::write_atomic(&self.path, line.as_bytes()) {
            Ok(()) => info!(path = %self.path.display(), "bind secret rotated"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to write bind secret"),
        }
        secret
    }
}

/// Extracts the secret from a `rootpw "<secret>"` line.
pub fn parse_secret(content: &str) -> Option<&str> {
    let line = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    let rest = line.strip_prefix("rootpw")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let quoted = rest.trim();
    let secret = quoted.strip_prefix('"')?.strip_suffix('"')?;
    is_valid_secret(secret).then_some(secret)
}

/// Returns true if `secret` can be written to the secret file unquoted.
pub fn is_valid_secret(secret: &str) -> bool {
    !secret.is_empty()
        && !secret
            .chars()
            .any(|c| c == '"' || c == '\\' || c.is_control())
}
