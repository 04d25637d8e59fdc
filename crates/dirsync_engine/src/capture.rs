//! The capture sink used in fallback mode.
//!
//! While fallback is active every change is appended to the capture log as
//! an LDIF change record instead of being applied. The log file doubles as
//! the persisted fallback flag: as long as it exists, a restarted engine
//! keeps capturing.

use crate::error::{DirectoryResult, ReplicationResult};
use crate::files;
use crate::target::DirectoryTarget;
use dirsync_ldif::{Attributes, LdifReader, LdifWriter, Modification, Record};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Append-only LDIF log of changes that could not be applied live.
pub struct CaptureSink {
    path: PathBuf,
    writer: Option<LdifWriter<File>>,
    written: u64,
}

impl CaptureSink {
    /// Creates a sink writing to `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            written: 0,
        }
    }

    /// Path of the capture log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the capture log exists, i.e. fallback is active.
    pub fn is_active(&self) -> bool {
        self.path.exists()
    }

    /// Records written by this sink since it was created.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// Creates the capture log so fallback survives a restart.
    pub fn activate(&mut self) -> io::Result<()> {
        self.writer()?;
        Ok(())
    }

    /// Appends one record. Failures are logged and swallowed.
    pub fn capture(&mut self, record: &Record) {
        let result = self
            .writer()
            .map_err(dirsync_ldif::LdifError::from)
            .and_then(|writer| writer.write_record(record));
        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                error!(dn = %record.dn, path = %self.path.display(), error = %e, "failed to write capture record");
                self.writer = None;
            }
        }
    }

    /// Reads every record in the capture log.
    pub fn read_records(&self) -> ReplicationResult<Vec<Record>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records = LdifReader::new(BufReader::new(file)).collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Moves the capture log aside to `<log>.<YYYYmmddHHMMSS>`.
    ///
    /// Returns the archive path, or `None` if there was no log.
    pub fn archive(&mut self) -> io::Result<Option<PathBuf>> {
        self.writer = None;
        if !self.path.exists() {
            return Ok(None);
        }
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        let mut archive = self.path.as_os_str().to_owned();
        archive.push(format!(".{}", stamp));
        let mut archive = PathBuf::from(archive);
        let mut n = 1;
        while archive.exists() {
            let mut next = self.path.as_os_str().to_owned();
            next.push(format!(".{}.{}", stamp, n));
            archive = PathBuf::from(next);
            n += 1;
        }
        fs::rename(&self.path, &archive)?;
        info!(path = %archive.display(), "capture log archived");
        Ok(Some(archive))
    }

    /// Removes the capture log without archiving it.
    pub fn discard(&mut self) -> io::Result<()> {
        self.writer = None;
        files::remove_if_exists(&self.path)
    }

    fn writer(&mut self) -> io::Result<&mut LdifWriter<File>> {
        if self.writer.is_none() || !self.path.exists() {
            if !self.path.exists() {
                warn!(path = %self.path.display(), "fallback mode active, capturing changes");
            }
            self.writer = Some(LdifWriter::new(files::open_append(&self.path)?));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "capture log not open"))
    }
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .field("written", &self.written)
            .finish()
    }
}

impl DirectoryTarget for CaptureSink {
    fn add(&mut self, dn: &str, attrs: &Attributes) -> DirectoryResult<()> {
        self.capture(&Record::add(dn, attrs.clone()));
        Ok(())
    }

    fn modify(&mut self, dn: &str, mods: &[Modification]) -> DirectoryResult<()> {
        if !mods.is_empty() {
            self.capture(&Record::modify(dn, mods.to_vec()));
        }
        Ok(())
    }

    fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.capture(&Record::delete(dn));
        Ok(())
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        self.capture(&Record::modrdn(
            dn,
            new_rdn,
            delete_old_rdn,
            new_superior.map(str::to_string),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirsync_ldif::Change;
    use tempfile::tempdir;

    #[test]
    fn captured_records_read_back() {
        let dir = tempdir().unwrap();
        let mut sink = CaptureSink::new(dir.path().join("failed.ldif"));
        assert!(!sink.is_active());

        sink.add("cn=a,dc=x", &vec![("cn".into(), vec![b"a".to_vec()])])
            .unwrap();
        sink.rename("cn=a,dc=x", "cn=b", true, None).unwrap();
        sink.delete("cn=b,dc=x").unwrap();

        assert!(sink.is_active());
        assert_eq!(sink.records_written(), 3);
        let records = sink.read_records().unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[1].change, Change::ModRdn { delete_old_rdn: true, .. }));
    }

    #[test]
    fn log_only_grows() {
        let dir = tempdir().unwrap();
        let mut sink = CaptureSink::new(dir.path().join("failed.ldif"));
        let mut last = 0;
        for i in 0..5 {
            sink.delete(&format!("cn={},dc=x", i)).unwrap();
            let len = fs::metadata(sink.path()).unwrap().len();
            assert!(len > last);
            last = len;
        }
    }

    #[test]
    fn archive_clears_the_flag() {
        let dir = tempdir().unwrap();
        let mut sink = CaptureSink::new(dir.path().join("failed.ldif"));
        sink.activate().unwrap();
        let archived = sink.archive().unwrap().unwrap();
        assert!(archived.exists());
        assert!(!sink.is_active());
        assert!(sink.archive().unwrap().is_none());
    }

    #[test]
    fn empty_modify_is_not_recorded() {
        let dir = tempdir().unwrap();
        let mut sink = CaptureSink::new(dir.path().join("failed.ldif"));
        sink.modify("cn=a,dc=x", &[]).unwrap();
        assert_eq!(sink.records_written(), 0);
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempdir().unwrap();
        let sink = CaptureSink::new(dir.path().join("failed.ldif"));
        assert!(sink.read_records().unwrap().is_empty());
    }
}
