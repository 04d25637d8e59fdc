//! Subtree backup and recursive delete.

use crate::dn;
use crate::entry::Entry;
use crate::error::DirectoryResult;
use crate::files;
use crate::target::{DirectoryTarget, LiveDirectory, Target};
use dirsync_ldif::{LdifWriter, Record};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Writes dated LDIF backups of subtrees about to be removed.
#[derive(Debug, Clone)]
pub struct SubtreeBackup {
    dir: PathBuf,
}

impl SubtreeBackup {
    /// Creates a backup writer for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backup directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves `entries` as add records, best effort.
    ///
    /// `label` is the entryUUID or RDN the backup is named after. Returns
    /// the file written, or `None` if there was nothing to save or the
    /// write failed.
    pub fn save(&self, entries: &[Entry], label: &str) -> Option<PathBuf> {
        if entries.is_empty() {
            return None;
        }
        match self.write(entries, label) {
            Ok(path) => {
                info!(path = %path.display(), entries = entries.len(), "subtree backed up");
                Some(path)
            }
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "subtree backup failed");
                None
            }
        }
    }

    fn write(&self, entries: &[Entry], label: &str) -> io::Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let label = sanitize(label);
        let mut attempt = 0;
        let (path, file) = loop {
            let name = match attempt {
                0 => format!("replication-{}-{}.ldif", stamp, label),
                n => format!("replication-{}-{}.{}.ldif", stamp, label, n),
            };
            let path = self.dir.join(name);
            match files::create_new(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1
                }
                Err(e) => return Err(e),
            }
        };

        let mut writer = LdifWriter::new(file);
        for entry in entries {
            writer
                .write_record(&Record::add(&entry.dn, entry.attrs.to_attributes()))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        Ok(path)
    }
}

fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '=' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "entry".to_string()
    } else {
        cleaned
    }
}

/// Deletes `dn` and everything below it, deepest entries first.
///
/// Entries that vanish in between are ignored. On the capture sink only
/// the delete of `dn` itself is recorded.
pub fn delete_subtree<L: LiveDirectory>(target: &mut Target<'_, L>, dn: &str) -> DirectoryResult<()> {
    let mut dns: Vec<String> = target
        .read_subtree(dn)?
        .into_iter()
        .map(|entry| entry.dn)
        .collect();
    if dns.is_empty() {
        if !target.is_capture() {
            return Ok(());
        }
        dns.push(dn.to_string());
    }
    dns.sort_by_key(|d| std::cmp::Reverse(dn::depth(d)));

    for d in &dns {
        match target.delete(d) {
            Ok(()) => debug!(dn = %d, "deleted"),
            Err(e) if e.is_no_such_object() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Backs up and deletes the subtree at `dn`. Does nothing if `dn` is free.
///
/// The capture sink cannot be read, so there the delete is recorded
/// unconditionally and nothing is backed up.
pub fn backup_and_delete<L: LiveDirectory>(
    target: &mut Target<'_, L>,
    backup: &SubtreeBackup,
    dn: &str,
    label: &str,
) -> DirectoryResult<()> {
    if target.is_capture() {
        warn!(dn = %dn, "recording subtree removal");
        return delete_subtree(target, dn);
    }
    let entries = target.read_subtree(dn)?;
    if entries.is_empty() {
        return Ok(());
    }
    warn!(dn = %dn, entries = entries.len(), "removing subtree");
    backup.save(&entries, label);
    delete_subtree(target, dn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AttributeMap;
    use tempfile::tempdir;

    fn entry(dn: &str) -> Entry {
        Entry::new(dn, AttributeMap::from_pairs([("cn", &["x"][..])]))
    }

    #[test]
    fn backup_names_carry_the_label() {
        let dir = tempdir().unwrap();
        let backup = SubtreeBackup::new(dir.path());
        let path = backup
            .save(&[entry("cn=a,dc=x"), entry("cn=b,cn=a,dc=x")], "cn=a/../x")
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("replication-"));
        assert!(name.ends_with("-cn=a____x.ldif"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(dirsync_ldif::from_ldif(&text).unwrap().len(), 2);
    }

    #[test]
    fn repeated_backups_do_not_overwrite() {
        let dir = tempdir().unwrap();
        let backup = SubtreeBackup::new(dir.path());
        let first = backup.save(&[entry("cn=a,dc=x")], "u1").unwrap();
        let second = backup.save(&[entry("cn=a,dc=x")], "u1").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn nothing_to_back_up() {
        let dir = tempdir().unwrap();
        assert!(SubtreeBackup::new(dir.path()).save(&[], "u1").is_none());
    }

    #[test]
    fn failed_backup_is_not_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let backup = SubtreeBackup::new(blocker.join("sub"));
        assert!(backup.save(&[entry("cn=a,dc=x")], "u1").is_none());
    }
}
