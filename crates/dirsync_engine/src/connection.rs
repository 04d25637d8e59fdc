//! Connection management.
//!
//! The [`ConnectionManager`] owns the live session on the local directory
//! and the capture sink, and decides which of the two receives the next
//! change. Binding uses the secret maintained by the
//! [`CredentialRotator`]; a missing or rejected secret is regenerated and
//! the directory server restarted so it picks the new one up.

use crate::capture::CaptureSink;
use crate::config::{ReplicationConfig, RetryConfig};
use crate::credentials::CredentialRotator;
use crate::error::{DirectoryError, DirectoryResult, ErrorClass};
use crate::service::ServiceControl;
use crate::target::{LiveDirectory, Target};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// Opens sessions on the local directory.
pub trait Connector {
    /// Session type.
    type Connection: LiveDirectory;

    /// Binds as `bind_dn` with `secret`.
    fn connect(&mut self, bind_dn: &str, secret: &str) -> DirectoryResult<Self::Connection>;
}

/// Hands out the live session or the capture sink.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    bind_dn: String,
    live: Option<C::Connection>,
    sink: CaptureSink,
    credentials: CredentialRotator,
    directory_service: Arc<dyn ServiceControl>,
    retry: RetryConfig,
    settle_delay: Duration,
    reconnect: bool,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager. No connection is made until first use.
    pub fn new(
        config: &ReplicationConfig,
        connector: C,
        directory_service: Arc<dyn ServiceControl>,
    ) -> Self {
        Self {
            connector,
            bind_dn: config.bind_dn.clone(),
            live: None,
            sink: CaptureSink::new(&config.capture_log),
            credentials: CredentialRotator::new(&config.secret_file, config.secret_length),
            directory_service,
            retry: config.retry.clone(),
            settle_delay: config.server_settle_delay,
            reconnect: false,
        }
    }

    /// Returns the target for the next operation.
    ///
    /// The capture sink is returned when `force_fallback` is set, when
    /// fallback is already active, or when binding fails after the retry
    /// budget; in the last two cases fallback becomes persistent.
    pub fn get_connection(&mut self, force_fallback: bool) -> Target<'_, C::Connection> {
        if force_fallback && !self.sink.is_active() {
            self.enter_fallback();
        }
        if self.sink.is_active() {
            return Target::Capture(&mut self.sink);
        }
        if self.live.is_none() || self.reconnect {
            self.live = None;
            match self.bind() {
                Ok(connection) => {
                    self.live = Some(connection);
                    self.reconnect = false;
                }
                Err(e) => {
                    error!(bind_dn = %self.bind_dn, error = %e, "cannot bind to local directory");
                    self.enter_fallback();
                }
            }
        }
        match self.live.as_mut() {
            Some(live) => Target::Live(live),
            None => Target::Capture(&mut self.sink),
        }
    }

    /// Returns a live session, binding if needed, regardless of fallback.
    pub fn connect_live(&mut self) -> DirectoryResult<&mut C::Connection> {
        if self.live.is_none() || self.reconnect {
            self.live = None;
            let connection = self.bind()?;
            self.reconnect = false;
            self.live = Some(connection);
        }
        self.live
            .as_mut()
            .ok_or_else(|| DirectoryError::unavailable("no live session"))
    }

    /// Drops the live session on next use and binds again.
    pub fn request_reconnect(&mut self) {
        self.reconnect = true;
    }

    /// Returns true if a reconnect is pending.
    pub fn reconnect_requested(&self) -> bool {
        self.reconnect
    }

    /// Switches to the capture sink until [`reset_fallback`](Self::reset_fallback).
    pub fn enter_fallback(&mut self) {
        if self.sink.is_active() {
            return;
        }
        warn!(path = %self.sink.path().display(), "switching to fallback mode");
        if let Err(e) = self.sink.activate() {
            error!(path = %self.sink.path().display(), error = %e, "cannot create capture log");
        }
        self.live = None;
    }

    /// Returns true if changes currently go to the capture sink.
    pub fn is_fallback(&self) -> bool {
        self.sink.is_active()
    }

    /// Leaves fallback mode, archiving the capture log.
    pub fn reset_fallback(&mut self) -> io::Result<Option<PathBuf>> {
        let archived = self.sink.archive()?;
        self.reconnect = true;
        info!("fallback mode reset");
        Ok(archived)
    }

    /// The capture sink.
    pub fn sink(&mut self) -> &mut CaptureSink {
        &mut self.sink
    }

    /// The credential rotator.
    pub fn credentials(&self) -> &CredentialRotator {
        &self.credentials
    }

    /// The underlying connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn bind(&mut self) -> DirectoryResult<C::Connection> {
        let (mut secret, mut rotated) = match self.credentials.current() {
            Some(secret) => (secret, false),
            None => {
                warn!(path = %self.credentials.path().display(), "bind secret missing or invalid");
                (self.rotate_and_restart(), true)
            }
        };
        let mut attempt = 0;
        loop {
            match self.connector.connect(&self.bind_dn, &secret) {
                Ok(connection) => {
                    info!(bind_dn = %self.bind_dn, "bound to local directory");
                    return Ok(connection);
                }
                Err(DirectoryError::InvalidCredentials { .. }) if !rotated => {
                    warn!(bind_dn = %self.bind_dn, "bind secret rejected, rotating");
                    secret = self.rotate_and_restart();
                    rotated = true;
                }
                Err(e) if e.class() == ErrorClass::TransientConnectivity => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(e);
                    }
                    warn!(attempt, max = self.retry.max_attempts, error = %e, "local directory unreachable, retrying");
                    std::thread::sleep(self.retry.delay_for_attempt(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn rotate_and_restart(&mut self) -> Zeroizing<String> {
        let secret = self.credentials.rotate();
        if let Err(e) = self.directory_service.restart() {
            warn!(error = %e, "failed to restart local directory server");
        }
        std::thread::sleep(self.settle_delay);
        secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryDirectory};
    use crate::service::{RecordingService, ServiceAction};
    use crate::target::DirectoryTarget;
    use tempfile::TempDir;

    struct Setup {
        _dir: TempDir,
        directory: MemoryDirectory,
        service: Arc<RecordingService>,
        manager: ConnectionManager<MemoryConnector>,
    }

    fn setup(attempts: u32) -> Setup {
        let dir = TempDir::new().unwrap();
        let config = ReplicationConfig::new("dc=x")
            .with_root(dir.path())
            .with_retry(RetryConfig::new(attempts, Duration::ZERO))
            .with_server_settle_delay(Duration::ZERO);
        let directory = MemoryDirectory::new();
        let connector = MemoryConnector::new(directory.clone()).with_secret_file(&config.secret_file);
        let service = Arc::new(RecordingService::new());
        let manager = ConnectionManager::new(&config, connector, service.clone());
        Setup {
            _dir: dir,
            directory,
            service,
            manager,
        }
    }

    #[test]
    fn missing_secret_is_generated() {
        let mut s = setup(3);
        assert!(!s.manager.get_connection(false).is_capture());
        assert_eq!(s.service.count(ServiceAction::Restart), 1);
        assert!(s.manager.credentials().current().is_some());
    }

    #[test]
    fn rejected_secret_is_rotated_once() {
        let dir = TempDir::new().unwrap();
        let config = ReplicationConfig::new("dc=x")
            .with_root(dir.path())
            .with_retry(RetryConfig::new(5, Duration::ZERO))
            .with_server_settle_delay(Duration::ZERO);
        std::fs::write(&config.secret_file, "rootpw \"stale\"\n").unwrap();
        let server_secret = dir.path().join("server.conf");
        std::fs::write(&server_secret, "rootpw \"other\"\n").unwrap();

        let connector = MemoryConnector::new(MemoryDirectory::new()).with_secret_file(&server_secret);
        let service = Arc::new(RecordingService::new());
        let mut manager = ConnectionManager::new(&config, connector, service.clone());

        assert!(manager.get_connection(false).is_capture());
        assert_eq!(service.count(ServiceAction::Restart), 1);
        assert_eq!(manager.connector().connects(), 2);
        assert_ne!(manager.credentials().current().unwrap().as_str(), "stale");
    }

    #[test]
    fn unreachable_server_enters_fallback() {
        let mut s = setup(3);
        s.directory.set_available(false);
        assert!(s.manager.get_connection(false).is_capture());
        assert!(s.manager.is_fallback());
        assert_eq!(s.manager.connector().connects(), 3);

        s.directory.set_available(true);
        assert!(s.manager.get_connection(false).is_capture());
    }

    #[test]
    fn reset_returns_to_live() {
        let mut s = setup(1);
        s.manager.enter_fallback();
        s.manager
            .get_connection(false)
            .delete("cn=a,dc=x")
            .unwrap();
        let archived = s.manager.reset_fallback().unwrap().unwrap();
        assert!(archived.exists());
        assert!(!s.manager.get_connection(false).is_capture());
    }

    #[test]
    fn forced_fallback_persists() {
        let mut s = setup(1);
        assert!(s.manager.get_connection(true).is_capture());
        assert!(s.manager.get_connection(false).is_capture());
    }

    #[test]
    fn reconnect_binds_again() {
        let mut s = setup(1);
        s.manager.get_connection(false);
        let before = s.manager.connector().connects();
        s.manager.request_reconnect();
        assert!(s.manager.reconnect_requested());
        s.manager.get_connection(false);
        assert_eq!(s.manager.connector().connects(), before + 1);
        assert!(!s.manager.reconnect_requested());
    }
}
