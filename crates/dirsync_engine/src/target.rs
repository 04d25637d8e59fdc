//! Directory targets: the operation interface shared by live sessions and
//! the capture sink.

use crate::capture::CaptureSink;
use crate::entry::{AttributeMap, Entry};
use crate::error::DirectoryResult;
use dirsync_ldif::{Attributes, Modification};

/// Write operations every target supports.
///
/// Callers cannot tell whether changes reach the local directory or the
/// capture log.
pub trait DirectoryTarget {
    /// Creates an entry.
    fn add(&mut self, dn: &str, attrs: &Attributes) -> DirectoryResult<()>;

    /// Modifies an entry.
    fn modify(&mut self, dn: &str, mods: &[Modification]) -> DirectoryResult<()>;

    /// Deletes a leaf entry.
    fn delete(&mut self, dn: &str) -> DirectoryResult<()>;

    /// Renames an entry, optionally moving it below `new_superior`.
    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()>;
}

/// A bound session on the local directory.
///
/// Adds the read operations needed to fetch authoritative state.
pub trait LiveDirectory: DirectoryTarget {
    /// Reads the entry at `dn` with all user and operational attributes.
    fn read_entry(&mut self, dn: &str) -> DirectoryResult<Option<AttributeMap>>;

    /// Reads `dn` and everything below it. Empty if `dn` does not exist.
    fn read_subtree(&mut self, dn: &str) -> DirectoryResult<Vec<Entry>>;
}

/// The target selected by the connection manager.
pub enum Target<'a, L: LiveDirectory> {
    /// A bound live session.
    Live(&'a mut L),
    /// The fallback capture sink.
    Capture(&'a mut CaptureSink),
}

impl<'a, L: LiveDirectory> Target<'a, L> {
    /// Returns true if changes go to the capture log.
    pub fn is_capture(&self) -> bool {
        matches!(self, Target::Capture(_))
    }

    /// Returns the live session, if any.
    pub fn as_live(&mut self) -> Option<&mut L> {
        match self {
            Target::Live(live) => Some(&mut **live),
            Target::Capture(_) => None,
        }
    }

    /// Reads the entry at `dn`; the capture sink knows no entries.
    pub fn read_entry(&mut self, dn: &str) -> DirectoryResult<Option<AttributeMap>> {
        match self {
            Target::Live(live) => live.read_entry(dn),
            Target::Capture(_) => Ok(None),
        }
    }

    /// Reads the subtree at `dn`; empty for the capture sink.
    pub fn read_subtree(&mut self, dn: &str) -> DirectoryResult<Vec<Entry>> {
        match self {
            Target::Live(live) => live.read_subtree(dn),
            Target::Capture(_) => Ok(Vec::new()),
        }
    }
}

impl<'a, L: LiveDirectory> DirectoryTarget for Target<'a, L> {
    fn add(&mut self, dn: &str, attrs: &Attributes) -> DirectoryResult<()> {
        match self {
            Target::Live(live) => live.add(dn, attrs),
            Target::Capture(sink) => sink.add(dn, attrs),
        }
    }

    fn modify(&mut self, dn: &str, mods: &[Modification]) -> DirectoryResult<()> {
        match self {
            Target::Live(live) => live.modify(dn, mods),
            Target::Capture(sink) => sink.modify(dn, mods),
        }
    }

    fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        match self {
            Target::Live(live) => live.delete(dn),
            Target::Capture(sink) => sink.delete(dn),
        }
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        match self {
            Target::Live(live) => live.rename(dn, new_rdn, delete_old_rdn, new_superior),
            Target::Capture(sink) => sink.rename(dn, new_rdn, delete_old_rdn, new_superior),
        }
    }
}
