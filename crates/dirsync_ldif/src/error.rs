//! Error types for the LDIF crate.

use std::io;
use thiserror::Error;

/// Result type for LDIF operations.
pub type LdifResult<T> = Result<T, LdifError>;

/// Errors that can occur while writing or reading LDIF.
#[derive(Error, Debug)]
pub enum LdifError {
    /// I/O error on the underlying writer or reader.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line could not be parsed.
    #[error("syntax error at line {line}: {message}")]
    Syntax {
        /// One-based line number where the error was detected.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A `::` value was not valid base64.
    #[error("invalid base64 value at line {line}")]
    InvalidBase64 {
        /// One-based line number of the value.
        line: usize,
    },

    /// The record uses a changetype this crate does not handle.
    #[error("unsupported changetype: {0}")]
    UnsupportedChangeType(String),

    /// A record was structurally incomplete.
    #[error("incomplete record for {dn}: {message}")]
    IncompleteRecord {
        /// DN of the offending record.
        dn: String,
        /// What was missing.
        message: String,
    },
}

impl LdifError {
    /// Creates a syntax error.
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    /// Creates an incomplete record error.
    pub fn incomplete(dn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IncompleteRecord {
            dn: dn.into(),
            message: message.into(),
        }
    }
}
