//! # dirsync Testkit
//!
//! Test utilities for dirsync.
//!
//! This crate provides:
//! - A throwaway replica backed by an in-memory directory
//! - Entry and notification builders
//! - Ready-made notification sequences (renames, redelivery)
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dirsync_testkit::prelude::*;
//!
//! #[test]
//! fn applies_an_add() {
//!     let mut replica = TestReplica::new();
//!     replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));
//!     assert!(replica.directory.contains(&dn("ann")));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scenarios::*;
    pub use dirsync_engine::{AttributeMap, ApplyOutcome, ChangeNotification, OperationTag};
}

pub use fixtures::*;
pub use generators::*;
pub use scenarios::*;
