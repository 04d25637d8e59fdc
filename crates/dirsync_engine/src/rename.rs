//! Two-phase rename correlation.
//!
//! The watcher reports a rename as two notifications: the entry vanishing
//! from its old DN (tagged as a rename hint), then the entry appearing at
//! its new DN. Phase 1 persists a marker `entryUUID -> old DN` and points
//! `current_modrdn` at it. Phase 2 finds the marker by entryUUID and turns
//! the pair into a single rename on the local directory.
//!
//! ```text
//! IDLE --hint--> PENDING_RENAME --add--> RENAMED | RECREATED | ABANDONED --> IDLE
//! ```

use crate::diff::compute_replace_all;
use crate::dn;
use crate::entry::AttributeMap;
use crate::error::DirectoryResult;
use crate::files;
use crate::subtree::{backup_and_delete, SubtreeBackup};
use crate::target::{DirectoryTarget, LiveDirectory, Target};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name of the pointer to the newest marker.
pub const CURRENT_MARKER: &str = "current_modrdn";

/// A pending rename: the DN an entry had before phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameMarker {
    /// entryUUID of the renamed entry.
    pub entry_uuid: Uuid,
    /// DN before the rename.
    pub dn: String,
    /// Seconds since the epoch when phase 1 was seen.
    pub created: i64,
}

impl RenameMarker {
    /// Creates a marker stamped with the current time.
    pub fn new(entry_uuid: Uuid, dn: impl Into<String>) -> Self {
        Self {
            entry_uuid,
            dn: dn.into(),
            created: chrono::Utc::now().timestamp(),
        }
    }
}

/// Marker files below the state directory.
///
/// Unreadable state is reported as "no marker".
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// Creates a store in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the markers.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, uuid: &Uuid) -> PathBuf {
        self.dir.join(uuid.hyphenated().to_string())
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_MARKER)
    }

    /// Persists `marker` and makes it the current one.
    pub fn save(&self, marker: &RenameMarker) -> io::Result<()> {
        let data = serde_json::to_vec(marker)?;
        files::write_atomic(&self.marker_path(&marker.entry_uuid), &data)?;
        files::write_atomic(
            &self.current_path(),
            marker.entry_uuid.hyphenated().to_string().as_bytes(),
        )
    }

    /// Loads the marker for `uuid`.
    pub fn load(&self, uuid: &Uuid) -> Option<RenameMarker> {
        let path = self.marker_path(uuid);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read rename marker");
                return None;
            }
        };
        match serde_json::from_slice::<RenameMarker>(&data) {
            Ok(marker) if marker.entry_uuid == *uuid => Some(marker),
            Ok(_) => {
                warn!(path = %path.display(), "rename marker names a different entry");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt rename marker");
                None
            }
        }
    }

    /// entryUUID the current marker pointer refers to.
    pub fn current(&self) -> Option<Uuid> {
        let path = self.current_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read current rename marker");
                return None;
            }
        };
        match Uuid::parse_str(text.trim()) {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt current rename marker");
                None
            }
        }
    }

    /// Removes the marker for `uuid`, and the pointer if it refers to it.
    pub fn remove(&self, uuid: &Uuid) {
        if let Err(e) = files::remove_if_exists(&self.marker_path(uuid)) {
            warn!(entry_uuid = %uuid, error = %e, "cannot remove rename marker");
        }
        if self.current() == Some(*uuid) {
            if let Err(e) = files::remove_if_exists(&self.current_path()) {
                warn!(entry_uuid = %uuid, error = %e, "cannot remove current rename marker");
            }
        }
    }

    /// All readable pending markers.
    pub fn pending(&self) -> Vec<RenameMarker> {
        let Ok(dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut markers: Vec<RenameMarker> = dir
            .filter_map(Result::ok)
            .filter_map(|entry| Uuid::parse_str(&entry.file_name().to_string_lossy()).ok())
            .filter_map(|uuid| self.load(&uuid))
            .collect();
        markers.sort_by_key(|m| m.created);
        markers
    }

    /// Removes every marker and the pointer.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// How phase 2 was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No marker for this entry; apply as an ordinary change.
    Idle,
    /// The entry was renamed from `from`; remaining attribute changes
    /// still have to be applied.
    Renamed {
        /// DN before the rename.
        from: String,
    },
    /// The old entry was gone; the entry has to be added from scratch.
    Recreated,
    /// A later rename superseded this one. The entry at the old DN was
    /// removed; the entry has to be added from scratch.
    Abandoned {
        /// DN of the removed entry.
        stale_dn: String,
    },
    /// The rename and the full entry state went to the capture log.
    Captured,
}

/// Correlates rename halves through the marker store.
#[derive(Debug, Clone)]
pub struct RenameCoordinator {
    markers: MarkerStore,
    backup: SubtreeBackup,
}

impl RenameCoordinator {
    /// Creates a coordinator.
    pub fn new(markers: MarkerStore, backup: SubtreeBackup) -> Self {
        Self { markers, backup }
    }

    /// The marker store.
    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// The subtree backup writer.
    pub fn backup(&self) -> &SubtreeBackup {
        &self.backup
    }

    /// Phase 1: remembers that `entry_uuid` left `dn`.
    ///
    /// Pending markers of other entries are abandoned first, removing
    /// their stale entries. Returns `false` if the marker cannot be
    /// written; the caller then deletes the entry and the rename degrades
    /// to delete plus add.
    pub fn begin<L: LiveDirectory>(
        &self,
        target: &mut Target<'_, L>,
        entry_uuid: Uuid,
        dn: &str,
    ) -> DirectoryResult<bool> {
        for marker in self.markers.pending() {
            if marker.entry_uuid != entry_uuid {
                self.abandon(target, &marker, dn)?;
            }
        }
        match self.markers.save(&RenameMarker::new(entry_uuid, dn)) {
            Ok(()) => {
                info!(dn = %dn, entry_uuid = %entry_uuid, "rename pending");
                Ok(true)
            }
            Err(e) => {
                warn!(dn = %dn, entry_uuid = %entry_uuid, error = %e, "cannot persist rename marker");
                Ok(false)
            }
        }
    }

    /// Drops `marker` and removes the entry still sitting at its old DN,
    /// unless that DN is `keep_dn` or now belongs to another entry.
    fn abandon<L: LiveDirectory>(
        &self,
        target: &mut Target<'_, L>,
        marker: &RenameMarker,
        keep_dn: &str,
    ) -> DirectoryResult<()> {
        warn!(old_dn = %marker.dn, entry_uuid = %marker.entry_uuid, "abandoning superseded rename");
        let taken_over = target
            .read_entry(&marker.dn)?
            .and_then(|occupant| self::entry_uuid(&occupant))
            .is_some_and(|uuid| uuid != marker.entry_uuid);
        if taken_over {
            debug!(dn = %marker.dn, "old DN reused by another entry, keeping it");
        } else if !dn::same(&marker.dn, keep_dn) {
            backup_and_delete(target, &self.backup, &marker.dn, &marker.entry_uuid.to_string())?;
        }
        self.markers.remove(&marker.entry_uuid);
        Ok(())
    }

    /// Phase 2: resolves a pending rename of `entry_uuid` to `dn`.
    ///
    /// The marker is deleted once resolution succeeded and kept when the
    /// directory reports an error, so a redelivered notification retries.
    pub fn resolve<L: LiveDirectory>(
        &self,
        target: &mut Target<'_, L>,
        dn: &str,
        new: &AttributeMap,
        entry_uuid: Uuid,
    ) -> DirectoryResult<Resolution> {
        let Some(marker) = self.markers.load(&entry_uuid) else {
            return Ok(Resolution::Idle);
        };

        if self.markers.current() != Some(entry_uuid) {
            self.abandon(target, &marker, dn)?;
            return Ok(Resolution::Abandoned {
                stale_dn: marker.dn,
            });
        }

        if dn::same(&marker.dn, dn) {
            self.markers.remove(&entry_uuid);
            return Ok(Resolution::Idle);
        }

        let old_rdn = dn::rdn(&marker.dn);
        let delete_old_rdn = dn::rdn_pairs(old_rdn)
            .iter()
            .any(|(attr, value)| !new.contains_value(attr, value));
        let (new_rdn, new_parent) = dn::split_rdn(dn);
        let new_superior =
            (!dn::same(dn::parent(&marker.dn), new_parent)).then_some(new_parent);

        if target.is_capture() {
            backup_and_delete(target, &self.backup, dn, dn::rdn(dn))?;
            target.rename(&marker.dn, new_rdn, delete_old_rdn, new_superior)?;
            target.modify(dn, &compute_replace_all(new))?;
            self.markers.remove(&entry_uuid);
            return Ok(Resolution::Captured);
        }

        if let Some(occupant) = target.read_entry(dn)? {
            if self::entry_uuid(&occupant) == Some(entry_uuid) {
                debug!(dn = %dn, entry_uuid = %entry_uuid, "rename already applied");
                self.markers.remove(&entry_uuid);
                return Ok(Resolution::Renamed { from: marker.dn });
            }
            warn!(dn = %dn, entry_uuid = %entry_uuid, "rename target occupied");
            backup_and_delete(target, &self.backup, dn, dn::rdn(dn))?;
        }

        if target.read_entry(&marker.dn)?.is_none() {
            info!(dn = %dn, old_dn = %marker.dn, "renamed entry missing locally, recreating");
            self.markers.remove(&entry_uuid);
            return Ok(Resolution::Recreated);
        }

        target.rename(&marker.dn, new_rdn, delete_old_rdn, new_superior)?;
        info!(dn = %dn, old_dn = %marker.dn, delete_old_rdn, "renamed");
        self.markers.remove(&entry_uuid);
        Ok(Resolution::Renamed { from: marker.dn })
    }
}

/// Extracts the entryUUID of an entry, if present and well formed.
pub fn entry_uuid(attrs: &AttributeMap) -> Option<Uuid> {
    attrs
        .first_str("entryUUID")
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSink;
    use crate::memory::MemoryDirectory;
    use tempfile::{tempdir, TempDir};

    const U1: &str = "0b6d2c9e-1f7a-4b8e-9c55-3f1a2b3c4d5e";
    const U2: &str = "7c1e0f3a-2b4d-4e6f-8a9b-0c1d2e3f4a5b";
    const U3: &str = "e4a1c2b3-5d6e-4f70-8192-a3b4c5d6e7f8";

    fn uuid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    fn person(uuid: &str, cn: &str) -> AttributeMap {
        AttributeMap::from_pairs([
            ("objectClass", &["person"][..]),
            ("cn", &[cn][..]),
            ("entryUUID", &[uuid][..]),
        ])
    }

    fn coordinator() -> (TempDir, RenameCoordinator) {
        let dir = tempdir().unwrap();
        let coordinator = RenameCoordinator::new(
            MarkerStore::new(dir.path().join("modrdn")),
            SubtreeBackup::new(dir.path().join("backup")),
        );
        (dir, coordinator)
    }

    fn hint(c: &RenameCoordinator, dir: &mut MemoryDirectory, u: &str, dn: &str) {
        assert!(c.begin(&mut Target::Live(dir), uuid(u), dn).unwrap());
    }

    #[test]
    fn marker_round_trip() {
        let (_dir, c) = coordinator();
        hint(&c, &mut MemoryDirectory::new(), U1, "cn=bob,dc=x");
        assert_eq!(c.markers().current(), Some(uuid(U1)));
        assert_eq!(c.markers().load(&uuid(U1)).unwrap().dn, "cn=bob,dc=x");
        c.markers().remove(&uuid(U1));
        assert!(c.markers().current().is_none());
        assert!(c.markers().load(&uuid(U1)).is_none());
    }

    #[test]
    fn corrupt_pointer_means_no_marker() {
        let (_dir, c) = coordinator();
        hint(&c, &mut MemoryDirectory::new(), U1, "cn=bob,dc=x");
        fs::write(c.markers().dir().join(CURRENT_MARKER), "garbage").unwrap();
        assert!(c.markers().current().is_none());
        fs::write(c.markers().dir().join(U1), "{not json").unwrap();
        assert!(c.markers().load(&uuid(U1)).is_none());
    }

    #[test]
    fn rename_to_free_dn() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        dir.insert("cn=bob,dc=x", person(U1, "bob"));
        hint(&c, &mut dir, U1, "cn=bob,dc=x");

        let mut target = Target::Live(&mut dir);
        let resolution = c
            .resolve(&mut target, "cn=robert,dc=x", &person(U1, "robert"), uuid(U1))
            .unwrap();
        assert_eq!(resolution, Resolution::Renamed { from: "cn=bob,dc=x".into() });

        let moved = dir.get("cn=robert,dc=x").unwrap();
        assert_eq!(moved.attrs.get("cn").unwrap(), &[b"robert".to_vec()][..]);
        assert!(!dir.contains("cn=bob,dc=x"));
        assert!(c.markers().load(&uuid(U1)).is_none());
    }

    #[test]
    fn surviving_rdn_value_is_kept() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        let mut attrs = person(U1, "bob");
        attrs.insert("cn", vec![b"bob".to_vec(), b"robert".to_vec()]);
        dir.insert("cn=bob,dc=x", attrs.clone());
        hint(&c, &mut dir, U1, "cn=bob,dc=x");

        let mut target = Target::Live(&mut dir);
        c.resolve(&mut target, "cn=robert,dc=x", &attrs, uuid(U1)).unwrap();
        assert_eq!(dir.get("cn=robert,dc=x").unwrap().attrs.get("cn").unwrap().len(), 2);
    }

    #[test]
    fn occupied_target_is_backed_up_and_replaced() {
        let (tmp, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        dir.insert("cn=bob,dc=x", person(U1, "bob"));
        dir.insert("cn=robert,dc=x", person(U2, "robert"));
        hint(&c, &mut dir, U1, "cn=bob,dc=x");

        let mut target = Target::Live(&mut dir);
        c.resolve(&mut target, "cn=robert,dc=x", &person(U1, "robert"), uuid(U1))
            .unwrap();
        let entry = dir.get("cn=robert,dc=x").unwrap();
        assert_eq!(entry.attrs.first_str("entryUUID"), Some(U1));
        assert_eq!(fs::read_dir(tmp.path().join("backup")).unwrap().count(), 1);
    }

    #[test]
    fn missing_old_entry_is_recreated() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        hint(&c, &mut dir, U1, "cn=bob,dc=x");
        let mut target = Target::Live(&mut dir);
        let resolution = c
            .resolve(&mut target, "cn=robert,dc=x", &person(U1, "robert"), uuid(U1))
            .unwrap();
        assert_eq!(resolution, Resolution::Recreated);
        assert!(c.markers().load(&uuid(U1)).is_none());
    }

    #[test]
    fn new_hint_abandons_pending_rename() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        dir.insert("cn=bob,dc=x", person(U1, "bob"));
        dir.insert("cn=ann,dc=x", person(U2, "ann"));
        hint(&c, &mut dir, U1, "cn=bob,dc=x");
        hint(&c, &mut dir, U2, "cn=ann,dc=x");

        assert!(!dir.contains("cn=bob,dc=x"));
        assert!(dir.contains("cn=ann,dc=x"));
        assert!(c.markers().load(&uuid(U1)).is_none());
        assert_eq!(c.markers().pending().len(), 1);
        assert_eq!(c.markers().current(), Some(uuid(U2)));

        let mut target = Target::Live(&mut dir);
        let resolution = c
            .resolve(&mut target, "cn=anna,dc=x", &person(U2, "anna"), uuid(U2))
            .unwrap();
        assert_eq!(resolution, Resolution::Renamed { from: "cn=ann,dc=x".into() });
        assert_eq!(dir.len(), 1);
        assert!(c.markers().pending().is_empty());
    }

    #[test]
    fn reused_old_dn_survives_abandon() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        dir.insert("cn=bob,dc=x", person(U1, "bob"));
        hint(&c, &mut dir, U1, "cn=bob,dc=x");
        dir.insert("cn=bob,dc=x", person(U3, "bob"));
        dir.insert("cn=ann,dc=x", person(U2, "ann"));
        hint(&c, &mut dir, U2, "cn=ann,dc=x");

        assert_eq!(dir.get("cn=bob,dc=x").unwrap().attrs.first_str("entryUUID"), Some(U3));
        assert!(c.markers().load(&uuid(U1)).is_none());
    }

    #[test]
    fn marker_without_pointer_is_abandoned() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        dir.insert("cn=bob,dc=x", person(U1, "bob"));
        hint(&c, &mut dir, U1, "cn=bob,dc=x");
        fs::remove_file(c.markers().dir().join(CURRENT_MARKER)).unwrap();

        let mut target = Target::Live(&mut dir);
        let resolution = c
            .resolve(&mut target, "cn=robert,dc=x", &person(U1, "robert"), uuid(U1))
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Abandoned { stale_dn: "cn=bob,dc=x".into() }
        );
        assert!(dir.is_empty());
        assert!(c.markers().pending().is_empty());
    }

    #[test]
    fn no_marker_is_idle() {
        let (_dir, c) = coordinator();
        let mut dir = MemoryDirectory::new();
        let mut target = Target::Live(&mut dir);
        let resolution = c
            .resolve(&mut target, "cn=robert,dc=x", &person(U1, "robert"), uuid(U1))
            .unwrap();
        assert_eq!(resolution, Resolution::Idle);
    }

    #[test]
    fn capture_records_modrdn_and_state() {
        let (tmp, c) = coordinator();
        let mut sink = CaptureSink::new(tmp.path().join("failed.ldif"));
        let mut target: Target<'_, MemoryDirectory> = Target::Capture(&mut sink);
        assert!(c.begin(&mut target, uuid(U1), "cn=bob,dc=x").unwrap());
        let resolution = c
            .resolve(&mut target, "cn=robert,ou=p,dc=x", &person(U1, "robert"), uuid(U1))
            .unwrap();
        assert_eq!(resolution, Resolution::Captured);
        let records = sink.read_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].dn, "cn=robert,ou=p,dc=x");
        assert_eq!(records[0].change, dirsync_ldif::Change::Delete);
        assert_eq!(records[1].dn, "cn=bob,dc=x");
        assert_eq!(
            records[1].change,
            dirsync_ldif::Change::ModRdn {
                new_rdn: "cn=robert".into(),
                delete_old_rdn: true,
                new_superior: Some("ou=p,dc=x".into()),
            }
        );
        assert!(matches!(records[2].change, dirsync_ldif::Change::Modify(_)));
    }

    #[test]
    fn capture_records_delete_of_abandoned_entry() {
        let (tmp, c) = coordinator();
        let mut sink = CaptureSink::new(tmp.path().join("failed.ldif"));
        let mut target: Target<'_, MemoryDirectory> = Target::Capture(&mut sink);
        assert!(c.begin(&mut target, uuid(U1), "cn=bob,dc=x").unwrap());
        assert!(c.begin(&mut target, uuid(U2), "cn=ann,dc=x").unwrap());

        let records = sink.read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dn, "cn=bob,dc=x");
        assert_eq!(records[0].change, dirsync_ldif::Change::Delete);
        assert!(c.markers().load(&uuid(U1)).is_none());
    }

    #[test]
    fn entry_uuid_extraction() {
        assert_eq!(entry_uuid(&person(U1, "bob")), Some(uuid(U1)));
        assert_eq!(entry_uuid(&AttributeMap::new()), None);
    }
}
