//! Disk space guard.
//!
//! Runs between notifications. When free space on the database
//! filesystem drops below the threshold the operator is mailed once and
//! the engine's own service is stopped; it stays down until restarted by
//! hand.

use crate::config::GuardConfig;
use crate::notify::{Notifier, OperatorMessage};
use crate::service::ServiceControl;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// Reports free space of a filesystem.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to unprivileged users on the filesystem holding `path`.
    fn available(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by `statvfs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Probe returning a fixed value.
#[derive(Debug, Default)]
pub struct FixedSpaceProbe {
    available: parking_lot::Mutex<u64>,
}

impl FixedSpaceProbe {
    /// Creates a probe reporting `available` bytes.
    pub fn new(available: u64) -> Self {
        Self {
            available: parking_lot::Mutex::new(available),
        }
    }

    /// Changes the reported value.
    pub fn set(&self, available: u64) {
        *self.available.lock() = available;
    }
}

impl SpaceProbe for FixedSpaceProbe {
    fn available(&self, _path: &Path) -> io::Result<u64> {
        Ok(*self.available.lock())
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Enough space, or the guard is disabled.
    Proceed,
    /// Space is critically low; the engine must stop.
    Halt {
        /// Bytes available.
        available: u64,
    },
}

/// Checks free disk space before each notification.
pub struct ResourceGuard {
    config: GuardConfig,
    database_dir: PathBuf,
    probe: Arc<dyn SpaceProbe>,
    notifier: Arc<dyn Notifier>,
    supervisor: Arc<dyn ServiceControl>,
    mailed: bool,
}

impl ResourceGuard {
    /// Creates a guard for the filesystem holding `database_dir`.
    pub fn new(
        config: GuardConfig,
        database_dir: impl Into<PathBuf>,
        probe: Arc<dyn SpaceProbe>,
        notifier: Arc<dyn Notifier>,
        supervisor: Arc<dyn ServiceControl>,
    ) -> Self {
        Self {
            config,
            database_dir: database_dir.into(),
            probe,
            notifier,
            supervisor,
            mailed: false,
        }
    }

    /// Minimum free bytes.
    pub fn threshold(&self) -> u64 {
        self.config.threshold_bytes
    }

    /// Runs one check.
    ///
    /// A probe failure is logged and treated as enough space.
    pub fn check(&mut self) -> GuardVerdict {
        if !self.config.enabled {
            return GuardVerdict::Proceed;
        }
        let available = match self.probe.available(&self.database_dir) {
            Ok(available) => available,
            Err(e) => {
                warn!(path = %self.database_dir.display(), error = %e, "cannot determine free disk space");
                return GuardVerdict::Proceed;
            }
        };
        if available >= self.config.threshold_bytes {
            return GuardVerdict::Proceed;
        }

        error!(
            path = %self.database_dir.display(),
            available,
            threshold = self.config.threshold_bytes,
            "critical disk space, stopping replication"
        );
        if !self.mailed {
            self.mailed = true;
            if let Err(e) = self.notifier.send(&self.message(available)) {
                warn!(error = %e, "failed to send disk space warning");
            }
        }
        if let Err(e) = self.supervisor.stop() {
            warn!(error = %e, "failed to stop replication service");
        }
        GuardVerdict::Halt { available }
    }

    fn message(&self, available: u64) -> OperatorMessage {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        OperatorMessage {
            from: self.config.sender.clone(),
            to: self.config.recipient.clone(),
            subject: format!("Critical: Directory replication on {} stopped", host),
            body: format!(
                "The free space on the filesystem holding {} dropped to {} bytes, \
                 below the limit of {} bytes.\n\n\
                 Directory replication has been stopped. Free some space and \
                 restart the replication service by hand.\n",
                self.database_dir.display(),
                available,
                self.config.threshold_bytes
            ),
        }
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("config", &self.config)
            .field("database_dir", &self.database_dir)
            .field("mailed", &self.mailed)
            .finish()
    }
}
