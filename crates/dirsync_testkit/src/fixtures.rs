//! Test fixtures and replica helpers.
//!
//! [`TestReplica`] wires a [`ReplicationEngine`] to an in-memory directory
//! and recording doubles for every external service, all rooted in a
//! temporary directory that is removed on drop.

use dirsync_engine::{
    AttributeMap, ApplyOutcome, ChangeNotification, EngineServices, Entry, FixedSpaceProbe,
    MemoryConnector, MemoryDirectory, MemoryNotifier, RecordingService, ReplicationConfig,
    ReplicationEngine, ReplicationResult, RetryConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Base DN used by all fixtures.
pub const BASE_DN: &str = "dc=example,dc=org";

/// A replica with automatic cleanup.
pub struct TestReplica {
    /// The engine under test.
    pub engine: ReplicationEngine<MemoryConnector>,
    /// The local directory the engine writes to.
    pub directory: MemoryDirectory,
    /// Records start/stop/restart of the directory server.
    pub directory_service: Arc<RecordingService>,
    /// Records stops of the engine's own service.
    pub supervisor: Arc<RecordingService>,
    /// Collects operator mail.
    pub notifier: Arc<MemoryNotifier>,
    /// Free space reported to the guard.
    pub probe: Arc<FixedSpaceProbe>,
    temp_dir: TempDir,
}

impl TestReplica {
    /// Creates a replica with fast retries and no settle delay.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a replica, letting `configure` adjust the configuration.
    ///
    /// Paths are rooted in the temporary directory before `configure` runs.
    pub fn with_config(configure: impl FnOnce(ReplicationConfig) -> ReplicationConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(
            ReplicationConfig::new(BASE_DN)
                .with_root(temp_dir.path())
                .with_retry(RetryConfig::new(3, Duration::ZERO))
                .with_server_settle_delay(Duration::ZERO),
        );

        let directory = MemoryDirectory::new();
        let directory_service = Arc::new(RecordingService::new());
        let supervisor = Arc::new(RecordingService::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let probe = Arc::new(FixedSpaceProbe::new(u64::MAX));
        let services = EngineServices {
            directory: directory_service.clone(),
            supervisor: supervisor.clone(),
            notifier: notifier.clone(),
            probe: probe.clone(),
        };
        let engine = ReplicationEngine::new(config, MemoryConnector::new(directory.clone()), services);

        Self {
            engine,
            directory,
            directory_service,
            supervisor,
            notifier,
            probe,
            temp_dir,
        }
    }

    /// Root of the replica's state.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The engine configuration.
    pub fn config(&self) -> &ReplicationConfig {
        self.engine.config()
    }

    /// Handles `change`, panicking on a hard error.
    pub fn apply(&mut self, change: &ChangeNotification) -> ApplyOutcome {
        self.engine
            .handle(change)
            .unwrap_or_else(|e| panic!("Failed to apply {}: {}", change.dn, e))
    }

    /// Handles `change`.
    pub fn try_apply(&mut self, change: &ChangeNotification) -> ReplicationResult<ApplyOutcome> {
        self.engine.handle(change)
    }

    /// Handles every change in order, returning the outcomes.
    pub fn apply_all<'a>(
        &mut self,
        changes: impl IntoIterator<Item = &'a ChangeNotification>,
    ) -> Vec<ApplyOutcome> {
        changes.into_iter().map(|change| self.apply(change)).collect()
    }

    /// Current directory contents.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.directory.entries()
    }

    /// Attributes of the entry at `dn`.
    pub fn entry(&self, dn: &str) -> Option<AttributeMap> {
        self.directory.get(dn).map(|entry| entry.attrs)
    }

    /// Subtree backup files written so far.
    pub fn backups(&self) -> Vec<PathBuf> {
        list_files(&self.config().backup_dir)
    }

    /// Archived capture logs.
    pub fn archived_logs(&self) -> Vec<PathBuf> {
        let log = self.config().capture_log.clone();
        let Some(name) = log.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Vec::new();
        };
        let Some(dir) = log.parent() else {
            return Vec::new();
        };
        list_files(dir)
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&format!("{}.", name)))
                    .unwrap_or(false)
            })
            .collect()
    }
}

impl Default for TestReplica {
    fn default() -> Self {
        Self::new()
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

/// Runs a test with a fresh replica.
pub fn with_replica<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestReplica) -> R,
{
    let mut replica = TestReplica::new();
    f(&mut replica)
}

/// DN of a person named `cn` directly below [`BASE_DN`].
pub fn dn(cn: &str) -> String {
    format!("cn={},{}", cn, BASE_DN)
}

/// Deterministic entryUUID number `n`.
pub fn uuid(n: u32) -> String {
    format!("00000000-0000-4000-8000-{:012x}", n)
}

/// Builds an attribute map from string pairs.
pub fn attrs(pairs: &[(&str, &[&str])]) -> AttributeMap {
    let mut map = AttributeMap::new();
    for (name, values) in pairs {
        map.insert(*name, values.iter().map(|v| v.as_bytes().to_vec()).collect());
    }
    map
}

/// A person entry with entryUUID number `n`.
pub fn person(cn: &str, n: u32) -> AttributeMap {
    let id = uuid(n);
    attrs(&[
        ("objectClass", &["top", "person"][..]),
        ("cn", &[cn][..]),
        ("sn", &[cn][..]),
        ("entryUUID", &[id.as_str()][..]),
    ])
}

/// A group entry listing `members` as `uniqueMember`.
pub fn group(cn: &str, members: &[String]) -> AttributeMap {
    let mut map = attrs(&[("objectClass", &["top", "groupOfUniqueNames"][..]), ("cn", &[cn][..])]);
    map.insert("uniqueMember", members.iter().map(|m| m.as_bytes().to_vec()).collect());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_applies_changes() {
        with_replica(|replica| {
            let outcome = replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));
            assert_eq!(outcome, ApplyOutcome::Applied);
            assert_eq!(replica.entry(&dn("ann")).unwrap().first_str("cn"), Some("ann"));
            assert!(replica.root().exists());
        });
    }

    #[test]
    fn uuids_are_valid() {
        assert_eq!(uuid(1), "00000000-0000-4000-8000-000000000001");
        assert_ne!(uuid(1), uuid(2));
    }

    #[test]
    fn group_lists_members() {
        let g = group("staff", &[dn("a"), dn("b")]);
        assert_eq!(g.get("uniquemember").unwrap().len(), 2);
    }
}
