//! In-memory directory for tests and dry runs.
//!
//! Behaves like the local directory server where the engine relies on it:
//! unique DNs, no-such-object and already-exists errors, refusal to delete
//! non-leaf entries, and renames that move whole subtrees. Clones share
//! the same state so a test can keep a handle while the engine owns a
//! session.

use crate::connection::Connector;
use crate::credentials::parse_secret;
use crate::dn;
use crate::entry::{AttributeMap, Entry};
use crate::error::{DirectoryError, DirectoryResult};
use crate::target::{DirectoryTarget, LiveDirectory};
use dirsync_ldif::{Attributes, Modification};
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A failure to inject into the next directory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The server is unreachable.
    Unavailable,
    /// The operation fails with a protocol result code.
    ResultCode(u32),
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    available: bool,
    failures: VecDeque<InjectedFailure>,
    required_attributes: Vec<String>,
    hidden: Vec<String>,
    writes: u64,
}

/// Shared in-memory directory.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    state: Arc<RwLock<State>>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    /// Creates an empty, available directory.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                available: true,
                ..State::default()
            })),
        }
    }

    /// Rejects adds that lack `attr` with a schema violation.
    pub fn require_attribute(&self, attr: impl Into<String>) {
        self.state.write().required_attributes.push(attr.into());
    }

    /// Makes the server reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.state.write().available = available;
    }

    /// Returns true if the server is reachable.
    pub fn is_available(&self) -> bool {
        self.state.read().available
    }

    /// Queues a failure for the next operation.
    pub fn inject(&self, failure: InjectedFailure) {
        self.state.write().failures.push_back(failure);
    }

    /// Makes the next read of `dn` report no entry, as if the read raced
    /// with a concurrent add.
    pub fn hide_once(&self, dn: &str) {
        self.state.write().hidden.push(dn::normalize(dn));
    }

    /// Inserts an entry directly, bypassing all checks.
    pub fn insert(&self, dn: &str, attrs: AttributeMap) {
        self.state
            .write()
            .entries
            .insert(dn::normalize(dn), Entry::new(dn, attrs));
    }

    /// Returns the entry at `dn`.
    pub fn get(&self, dn: &str) -> Option<Entry> {
        self.state.read().entries.get(&dn::normalize(dn)).cloned()
    }

    /// Returns true if an entry exists at `dn`.
    pub fn contains(&self, dn: &str) -> bool {
        self.state.read().entries.contains_key(&dn::normalize(dn))
    }

    /// All entries, ordered by normalized DN.
    pub fn entries(&self) -> Vec<Entry> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if the directory holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful write operations.
    pub fn writes(&self) -> u64 {
        self.state.read().writes
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.state.write().entries.clear();
    }
}

fn check(state: &mut State, dn: &str) -> DirectoryResult<()> {
    if !state.available {
        return Err(DirectoryError::unavailable("connection refused"));
    }
    match state.failures.pop_front() {
        Some(InjectedFailure::Unavailable) => {
            Err(DirectoryError::unavailable("connection reset"))
        }
        Some(InjectedFailure::ResultCode(code)) => {
            Err(DirectoryError::from_result_code(code, dn, "injected failure"))
        }
        None => Ok(()),
    }
}

fn has_children(state: &State, key: &str) -> bool {
    let suffix = format!(",{}", key);
    state.entries.keys().any(|k| k.ends_with(&suffix))
}

/// Replaces the `old_base` suffix of `dn` with `new_base`.
fn rebase(dn_str: &str, old_base: &str, new_base: &str) -> String {
    let keep = dn::depth(dn_str).saturating_sub(dn::depth(old_base));
    let mut prefix = Vec::with_capacity(keep);
    let mut rest = dn_str;
    for _ in 0..keep {
        let (rdn, parent) = dn::split_rdn(rest);
        prefix.push(rdn);
        rest = parent;
    }
    prefix.push(new_base);
    prefix.join(",")
}

impl DirectoryTarget for MemoryDirectory {
    fn add(&mut self, dn_str: &str, attrs: &Attributes) -> DirectoryResult<()> {
        let mut state = self.state.write();
        check(&mut state, dn_str)?;
        let key = dn::normalize(dn_str);
        if state.entries.contains_key(&key) {
            return Err(DirectoryError::already_exists(dn_str));
        }
        let map = AttributeMap::from(attrs.clone());
        if let Some(missing) = state
            .required_attributes
            .iter()
            .find(|attr| map.get(attr).is_none())
        {
            return Err(DirectoryError::schema_violation(
                dn_str,
                format!("missing required attribute {}", missing),
            ));
        }
        state.entries.insert(key, Entry::new(dn_str, map));
        state.writes += 1;
        Ok(())
    }

    fn modify(&mut self, dn_str: &str, mods: &[Modification]) -> DirectoryResult<()> {
        let mut state = self.state.write();
        check(&mut state, dn_str)?;
        let entry = state
            .entries
            .get_mut(&dn::normalize(dn_str))
            .ok_or_else(|| DirectoryError::no_such_object(dn_str))?;
        for m in mods {
            entry.attrs.apply(m);
        }
        state.writes += 1;
        Ok(())
    }

    fn delete(&mut self, dn_str: &str) -> DirectoryResult<()> {
        let mut state = self.state.write();
        check(&mut state, dn_str)?;
        let key = dn::normalize(dn_str);
        if !state.entries.contains_key(&key) {
            return Err(DirectoryError::no_such_object(dn_str));
        }
        if has_children(&state, &key) {
            return Err(DirectoryError::not_allowed_on_non_leaf(dn_str));
        }
        state.entries.remove(&key);
        state.writes += 1;
        Ok(())
    }

    fn rename(
        &mut self,
        dn_str: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        let mut state = self.state.write();
        check(&mut state, dn_str)?;
        let key = dn::normalize(dn_str);
        if !state.entries.contains_key(&key) {
            return Err(DirectoryError::no_such_object(dn_str));
        }
        let parent = new_superior.unwrap_or_else(|| dn::parent(dn_str));
        let new_dn = if parent.is_empty() {
            new_rdn.to_string()
        } else {
            format!("{},{}", new_rdn, parent)
        };
        let new_key = dn::normalize(&new_dn);
        if new_key != key && state.entries.contains_key(&new_key) {
            return Err(DirectoryError::already_exists(new_dn));
        }

        let moved: Vec<String> = state
            .entries
            .keys()
            .filter(|k| dn::is_within(k, &key))
            .cloned()
            .collect();
        for old_key in moved {
            let Some(mut entry) = state.entries.remove(&old_key) else {
                continue;
            };
            if old_key == key {
                if delete_old_rdn {
                    for (attr, value) in dn::rdn_pairs(dn::rdn(dn_str)) {
                        entry.attrs.apply(&Modification::delete(attr, vec![value]));
                    }
                }
                for (attr, value) in dn::rdn_pairs(new_rdn) {
                    entry.attrs.apply(&Modification::add(attr, vec![value]));
                }
                entry.dn = new_dn.clone();
            } else {
                entry.dn = rebase(&entry.dn, dn_str, &new_dn);
            }
            state.entries.insert(dn::normalize(&entry.dn), entry);
        }
        state.writes += 1;
        Ok(())
    }
}

impl LiveDirectory for MemoryDirectory {
    fn read_entry(&mut self, dn_str: &str) -> DirectoryResult<Option<AttributeMap>> {
        let mut state = self.state.write();
        check(&mut state, dn_str)?;
        let key = dn::normalize(dn_str);
        if let Some(pos) = state.hidden.iter().position(|h| *h == key) {
            state.hidden.remove(pos);
            return Ok(None);
        }
        Ok(state.entries.get(&key).map(|entry| entry.attrs.clone()))
    }

    fn read_subtree(&mut self, dn_str: &str) -> DirectoryResult<Vec<Entry>> {
        let mut state = self.state.write();
        check(&mut state, dn_str)?;
        let key = dn::normalize(dn_str);
        let mut entries: Vec<Entry> = state
            .entries
            .iter()
            .filter(|(k, _)| dn::is_within(k, &key))
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by_key(|entry| dn::depth(&entry.dn));
        Ok(entries)
    }
}

/// Hands out sessions on a [`MemoryDirectory`].
///
/// With a secret file configured, binds succeed only with the secret
/// currently stored in it, like a server that reads its root password
/// from that file.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    directory: MemoryDirectory,
    secret_file: Option<PathBuf>,
    connects: Arc<AtomicU64>,
}

impl MemoryConnector {
    /// Creates a connector accepting any secret.
    pub fn new(directory: MemoryDirectory) -> Self {
        Self {
            directory,
            secret_file: None,
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Requires binds to use the secret stored in `path`.
    pub fn with_secret_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secret_file = Some(path.into());
        self
    }

    /// Number of bind attempts so far.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryDirectory;

    fn connect(&mut self, bind_dn: &str, secret: &str) -> DirectoryResult<MemoryDirectory> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.directory.is_available() {
            return Err(DirectoryError::unavailable("connection refused"));
        }
        if let Some(path) = &self.secret_file {
            let stored = std::fs::read_to_string(path).unwrap_or_default();
            if parse_secret(&stored) != Some(secret) {
                return Err(DirectoryError::InvalidCredentials {
                    bind_dn: bind_dn.to_string(),
                });
            }
        }
        Ok(self.directory.clone())
    }
}
