//! # dirsync Engine
//!
//! Replica-side directory synchronization.
//!
//! This crate provides:
//! - Attribute-level diffing between two entry states
//! - Two-phase rename correlation through persisted markers
//! - An entry applier with a typed error taxonomy and bounded retries
//! - Fallback mode capturing changes to an LDIF log
//! - Schema replication with superior-first ordering
//! - A disk space guard that halts replication before the database fills up
//!
//! ## Architecture
//!
//! An upstream watcher delivers one [`ChangeNotification`] per changed
//! entry, at least once and in order. The [`ReplicationEngine`] handles
//! them one at a time:
//! 1. The [`ResourceGuard`] checks free disk space
//! 2. The subschema entry goes to the [`SchemaSynchronizer`]
//! 3. Everything else goes to the [`EntryApplier`], which asks the
//!    [`ConnectionManager`] for a [`Target`]: the live directory or the
//!    [`CaptureSink`]
//!
//! ## Key Invariants
//!
//! - Applying a notification twice leaves the same state as applying it once
//! - Excluded attributes are never written
//! - At most one pending rename marker exists per entryUUID
//! - The capture log is only ever appended to
//! - The old entry state is read from the local directory, never trusted
//!   from the notification

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod capture;
mod config;
mod connection;
mod credentials;
mod diff;
pub mod dn;
mod engine;
mod entry;
mod error;
mod files;
mod guard;
mod ldap;
mod memory;
mod notify;
mod rename;
mod schema;
mod service;
mod stats;
mod subtree;
mod target;

pub use applier::{ApplyOutcome, EntryApplier};
pub use capture::CaptureSink;
pub use config::{GuardConfig, RecoveryPolicy, ReplicationConfig, RetryConfig};
pub use connection::{ConnectionManager, Connector};
pub use credentials::{is_valid_secret, parse_secret, CredentialRotator};
pub use diff::{
    compute_add, compute_modify, compute_replace_all, is_excluded, strip_excluded, EXCLUDED_ATTRIBUTES,
    MEMBERSHIP_ATTRIBUTE,
};
pub use engine::{
    replay_record, EngineServices, FallbackStatus, ReplayReport, ReplicationEngine, DIRECTORY_INIT_SCRIPT,
    ENGINE_SERVICE,
};
pub use entry::{same_value_set, AttributeMap, ChangeNotification, Entry, OperationTag};
pub use error::{DirectoryError, DirectoryResult, ErrorClass, ReplicationError, ReplicationResult};
pub use guard::{FixedSpaceProbe, FsSpaceProbe, GuardVerdict, ResourceGuard, SpaceProbe};
pub use ldap::{LdapConnector, LdapDirectory};
pub use memory::{InjectedFailure, MemoryConnector, MemoryDirectory};
pub use notify::{MemoryNotifier, Notifier, OperatorMessage, SendmailNotifier};
pub use rename::{entry_uuid, MarkerStore, RenameCoordinator, RenameMarker, Resolution, CURRENT_MARKER};
pub use schema::{
    is_schema_dn, order_definitions, render as render_schema, wrap_line, DefinitionKind, SchemaDefinition,
    SchemaSynchronizer, SchemaUpdate, BUILTIN_OIDS, SCHEMA_DN,
};
pub use service::{RecordingService, ServiceAction, ServiceCommand, ServiceControl};
pub use stats::{ReplicationStats, StatsSnapshot};
pub use subtree::{backup_and_delete, delete_subtree, SubtreeBackup};
pub use target::{DirectoryTarget, LiveDirectory, Target};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exported LDIF types used in this crate's API.
pub use dirsync_ldif::{Attributes, Change, ModOp, Modification, Record};
