//! # dirsync LDIF
//!
//! LDIF change records for dirsync.
//!
//! The replica writes LDIF in two places: the capture log that records
//! changes while the local directory is unreachable, and the subtree
//! backups taken before destructive rename handling. Both are plain
//! RFC 2849 change records so an operator can inspect or replay them
//! with standard tools.
//!
//! ## Format rules
//!
//! - Values that are not SAFE-STRINGs are written base64 with `::`
//! - Lines longer than the fold width continue on lines starting with one space
//! - Every record ends with a blank line; every modify section ends with `-`
//! - Records are flushed as soon as they are written
//!
//! ## Usage
//!
//! ```
//! use dirsync_ldif::{from_ldif, to_ldif, Modification, Record};
//!
//! let record = Record::modify(
//!     "cn=staff,dc=example,dc=org",
//!     vec![Modification::add("uniqueMember", vec![b"uid=ann,dc=example,dc=org".to_vec()])],
//! );
//! let text = to_ldif(&record);
//! assert_eq!(from_ldif(&text).unwrap(), vec![record]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod record;

pub use decoder::{from_ldif, LdifReader};
pub use encoder::{is_safe_value, to_ldif, LdifWriter, DEFAULT_FOLD_WIDTH};
pub use error::{LdifError, LdifResult};
pub use record::{Attributes, Change, ModOp, Modification, Record};
