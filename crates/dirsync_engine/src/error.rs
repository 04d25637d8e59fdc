//! Error types for the replication engine.

use std::io;
use thiserror::Error;

/// Result type for operations against a directory target.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Result type for engine operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// How the applier reacts to a directory error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Server down or unreachable. Retried with a bounded budget, then fallback.
    TransientConnectivity,
    /// The target DN already exists. Re-fetched and reconciled into a modify.
    AlreadyExists,
    /// The entry violates the local schema. Dropped, never retried.
    SchemaViolation,
    /// Operation not allowed on a non-leaf entry. Escalated to a subtree delete.
    StructuralError,
    /// Anything else. Handled according to the recovery policy.
    Unclassified,
}

/// Errors reported by a directory target.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The directory server could not be reached or dropped the connection.
    #[error("directory unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The bind credentials were rejected.
    #[error("invalid credentials for {bind_dn}")]
    InvalidCredentials {
        /// DN used for the bind.
        bind_dn: String,
    },

    /// An entry already exists at the DN.
    #[error("entry already exists: {dn}")]
    AlreadyExists {
        /// The conflicting DN.
        dn: String,
    },

    /// No entry exists at the DN.
    #[error("no such entry: {dn}")]
    NoSuchObject {
        /// The missing DN.
        dn: String,
    },

    /// The change violates the local schema.
    #[error("schema violation on {dn}: {message}")]
    SchemaViolation {
        /// DN of the rejected entry.
        dn: String,
        /// Server diagnostic.
        message: String,
    },

    /// The entry still has children.
    #[error("operation not allowed on non-leaf entry: {dn}")]
    NotAllowedOnNonLeaf {
        /// DN of the non-leaf entry.
        dn: String,
    },

    /// Any other result code.
    #[error("directory error {code} on {dn}: {message}")]
    Other {
        /// Protocol result code.
        code: u32,
        /// DN the operation targeted.
        dn: String,
        /// Server diagnostic.
        message: String,
    },

    /// Local I/O error while talking to the target.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DirectoryError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an already-exists error.
    pub fn already_exists(dn: impl Into<String>) -> Self {
        Self::AlreadyExists { dn: dn.into() }
    }

    /// Creates a no-such-object error.
    pub fn no_such_object(dn: impl Into<String>) -> Self {
        Self::NoSuchObject { dn: dn.into() }
    }

    /// Creates a schema violation error.
    pub fn schema_violation(dn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            dn: dn.into(),
            message: message.into(),
        }
    }

    /// Creates a not-allowed-on-non-leaf error.
    pub fn not_allowed_on_non_leaf(dn: impl Into<String>) -> Self {
        Self::NotAllowedOnNonLeaf { dn: dn.into() }
    }

    /// Maps a protocol result code to an error.
    pub fn from_result_code(code: u32, dn: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            32 => Self::no_such_object(dn),
            49 => Self::InvalidCredentials {
                bind_dn: dn.to_string(),
            },
            66 => Self::not_allowed_on_non_leaf(dn),
            68 => Self::already_exists(dn),
            17 | 18 | 19 | 21 | 64 | 65 | 67 | 69 => Self::schema_violation(dn, message),
            51 | 52 | 80 | 81 | 85 | 91 => Self::Unavailable {
                message: format!("result code {}: {}", code, message),
            },
            _ => Self::Other {
                code,
                dn: dn.to_string(),
                message,
            },
        }
    }

    /// Returns the recovery class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            DirectoryError::Unavailable { .. } => ErrorClass::TransientConnectivity,
            DirectoryError::AlreadyExists { .. } => ErrorClass::AlreadyExists,
            DirectoryError::SchemaViolation { .. } => ErrorClass::SchemaViolation,
            DirectoryError::NotAllowedOnNonLeaf { .. } => ErrorClass::StructuralError,
            DirectoryError::InvalidCredentials { .. }
            | DirectoryError::NoSuchObject { .. }
            | DirectoryError::Other { .. }
            | DirectoryError::Io(_) => ErrorClass::Unclassified,
        }
    }

    /// Returns true if the error means the DN does not exist.
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, DirectoryError::NoSuchObject { .. })
    }
}

/// Hard failures of the engine.
///
/// Expected per-entry outcomes (reconciliation, skipped entries, fallback)
/// are reported through [`crate::ApplyOutcome`], not through this type.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A directory error that could not be handled locally.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The capture log could not be parsed.
    #[error("LDIF error: {0}")]
    Ldif(#[from] dirsync_ldif::LdifError),

    /// The restart policy asks the supervisor to restart the process.
    #[error("restart required after error on {dn}: {source}")]
    RestartRequired {
        /// DN of the notification being applied.
        dn: String,
        /// The error that triggered the restart.
        #[source]
        source: DirectoryError,
    },

    /// The bounded apply loop gave up.
    #[error("giving up on {dn} after {attempts} attempts")]
    RetriesExhausted {
        /// DN of the notification being applied.
        dn: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Free disk space fell below the configured threshold.
    #[error("free disk space too low: {available} bytes available, {threshold} required")]
    DiskSpaceExhausted {
        /// Bytes available on the database filesystem.
        available: u64,
        /// Configured minimum.
        threshold: u64,
    },

    /// The notification is malformed.
    #[error("invalid notification for {dn}: {message}")]
    InvalidNotification {
        /// DN of the notification.
        dn: String,
        /// What is wrong with it.
        message: String,
    },

    /// A live session was required but could not be established.
    #[error("live directory not available: {0}")]
    NotConnected(String),
}

impl ReplicationError {
    /// Creates an invalid notification error.
    pub fn invalid_notification(dn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNotification {
            dn: dn.into(),
            message: message.into(),
        }
    }
}
