//! Private state files.
//!
//! Everything the engine persists may contain secrets or directory data,
//! so files are created with mode 0600.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Opens `path` for appending, creating it with mode 0600.
pub(crate) fn open_append(path: &Path) -> io::Result<File> {
    create_parent(path)?;
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    restrict(&mut options);
    options.open(path)
}

/// Creates `path` exclusively with mode 0600.
pub(crate) fn create_new(path: &Path) -> io::Result<File> {
    create_parent(path)?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    restrict(&mut options);
    options.open(path)
}

/// Replaces `path` with `data` through a temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    write_staged(Path::new(&temp), path, data)
}

/// Writes `data` to `staging`, syncs it and renames it over `path`.
pub(crate) fn write_staged(staging: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    create_parent(staging)?;
    create_parent(path)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    restrict(&mut options);
    let mut file = options.open(staging)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(staging, path)?;
    sync_parent(path)
}

/// Removes `path`, treating a missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Removes everything inside `dir`, keeping `dir` itself. Returns the
/// number of entries removed.
pub(crate) fn clear_dir(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        removed += 1;
    }
    Ok(removed)
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn restrict(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn restrict(_options: &mut OpenOptions) {}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("nested").join("state.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn files_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        drop(open_append(&path).unwrap());
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn create_new_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x");
        drop(create_new(&path).unwrap());
        assert!(create_new(&path).is_err());
    }

    #[test]
    fn clear_dir_keeps_the_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("data.mdb"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("lock.mdb"), b"x").unwrap();

        assert_eq!(clear_dir(dir.path()).unwrap(), 2);
        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(clear_dir(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn staged_write_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("stage").join("schema.conf.new");
        let path = dir.path().join("schema.conf");
        fs::write(&path, b"old").unwrap();

        write_staged(&staging, &path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!staging.exists());
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempdir().unwrap();
        remove_if_exists(&dir.path().join("missing")).unwrap();
    }
}
