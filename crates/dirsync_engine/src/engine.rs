//! The replication engine.
//!
//! [`ReplicationEngine`] is the single worker that consumes change
//! notifications in delivery order. It owns every piece of mutable state:
//! the connection manager with its reconnect flag, the rename markers and
//! the statistics.

use crate::applier::{ApplyOutcome, EntryApplier};
use crate::config::ReplicationConfig;
use crate::connection::{ConnectionManager, Connector};
use crate::entry::ChangeNotification;
use crate::error::{DirectoryError, DirectoryResult, ErrorClass, ReplicationError, ReplicationResult};
use crate::files;
use crate::guard::{FsSpaceProbe, GuardVerdict, ResourceGuard, SpaceProbe};
use crate::ldap::LdapConnector;
use crate::notify::{Notifier, SendmailNotifier};
use crate::rename::{MarkerStore, RenameCoordinator, RenameMarker};
use crate::schema::{self, SchemaSynchronizer, SchemaUpdate};
use crate::service::{ServiceCommand, ServiceControl};
use crate::stats::ReplicationStats;
use crate::subtree::{delete_subtree, SubtreeBackup};
use crate::target::{DirectoryTarget, Target};
use dirsync_ldif::{Change, Record};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Init script of the local directory server.
pub const DIRECTORY_INIT_SCRIPT: &str = "/etc/init.d/slapd";

/// Supervised service running the engine itself.
pub const ENGINE_SERVICE: &str = "dirsync";

/// External collaborators of the engine.
#[derive(Clone)]
pub struct EngineServices {
    /// Controls the local directory server.
    pub directory: Arc<dyn ServiceControl>,
    /// Controls the engine's own supervised service.
    pub supervisor: Arc<dyn ServiceControl>,
    /// Delivers operator mail.
    pub notifier: Arc<dyn Notifier>,
    /// Reports free disk space.
    pub probe: Arc<dyn SpaceProbe>,
}

impl EngineServices {
    /// Services of a regular installation.
    pub fn system() -> Self {
        Self {
            directory: Arc::new(ServiceCommand::init_script(DIRECTORY_INIT_SCRIPT)),
            supervisor: Arc::new(ServiceCommand::runit(ENGINE_SERVICE)),
            notifier: Arc::new(SendmailNotifier::new()),
            probe: Arc::new(FsSpaceProbe),
        }
    }
}

impl std::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineServices").finish_non_exhaustive()
    }
}

/// Result of replaying the capture log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records applied.
    pub applied: u64,
    /// Records whose effect was already present.
    pub converged: u64,
    /// Where the replayed log was archived.
    pub archive: Option<PathBuf>,
}

/// State of fallback mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackStatus {
    /// Whether changes are being captured.
    pub active: bool,
    /// Capture log path.
    pub path: PathBuf,
    /// Records in the capture log.
    pub records: usize,
}

/// Consumes change notifications and keeps the local directory in sync.
pub struct ReplicationEngine<C: Connector> {
    config: ReplicationConfig,
    connections: ConnectionManager<C>,
    applier: EntryApplier,
    schema: SchemaSynchronizer,
    guard: ResourceGuard,
    directory_service: Arc<dyn ServiceControl>,
    stats: ReplicationStats,
}

impl ReplicationEngine<LdapConnector> {
    /// Creates an engine talking to the directory at `config.ldap_url`
    /// with the system services.
    pub fn system(config: ReplicationConfig) -> Self {
        let connector = LdapConnector::new(config.ldap_url.clone());
        Self::new(config, connector, EngineServices::system())
    }
}

impl<C: Connector> ReplicationEngine<C> {
    /// Creates an engine. Nothing is connected until the first notification.
    pub fn new(config: ReplicationConfig, connector: C, services: EngineServices) -> Self {
        let connections = ConnectionManager::new(&config, connector, services.directory.clone());
        let renames = RenameCoordinator::new(
            MarkerStore::new(&config.marker_dir),
            SubtreeBackup::new(&config.backup_dir),
        );
        let applier = EntryApplier::new(&config, renames);
        let schema = SchemaSynchronizer::new(&config, services.directory.clone());
        let guard = ResourceGuard::new(
            config.guard.clone(),
            &config.database_dir,
            services.probe,
            services.notifier,
            services.supervisor,
        );
        Self {
            config,
            connections,
            applier,
            schema,
            guard,
            directory_service: services.directory,
            stats: ReplicationStats::new(),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Replication counters.
    pub fn stats(&self) -> &ReplicationStats {
        &self.stats
    }

    /// The connection manager.
    pub fn connections(&mut self) -> &mut ConnectionManager<C> {
        &mut self.connections
    }

    /// Rename markers still waiting for their second half.
    pub fn pending_renames(&self) -> Vec<RenameMarker> {
        self.applier.renames().markers().pending()
    }

    /// Handles one notification.
    ///
    /// The disk space guard runs first; when it halts, the notification is
    /// returned as an error and must be redelivered.
    pub fn handle(&mut self, change: &ChangeNotification) -> ReplicationResult<ApplyOutcome> {
        let result = self.dispatch(change);
        match &result {
            Ok(outcome) => self.stats.record_outcome(*outcome),
            Err(e) => {
                error!(dn = %change.dn, error = %e, "notification failed");
                self.stats.record_error(e);
            }
        }
        result
    }

    fn dispatch(&mut self, change: &ChangeNotification) -> ReplicationResult<ApplyOutcome> {
        if let GuardVerdict::Halt { available } = self.guard.check() {
            return Err(ReplicationError::DiskSpaceExhausted {
                available,
                threshold: self.guard.threshold(),
            });
        }
        if schema::is_schema_dn(&change.dn) {
            return self.update_schema(change).map(|_| ApplyOutcome::Applied);
        }
        debug!(dn = %change.dn, op = ?change.tag, "handling notification");
        self.applier.apply(&mut self.connections, change)
    }

    fn update_schema(&mut self, change: &ChangeNotification) -> ReplicationResult<Option<SchemaUpdate>> {
        let Some(new) = &change.new else {
            warn!(dn = %change.dn, "ignoring removal of the subschema entry");
            return Ok(None);
        };
        let update = self.schema.update(new)?;
        self.stats.record_schema_update();
        self.connections.request_reconnect();
        Ok(Some(update))
    }

    /// Runs the disk space guard on its own.
    pub fn check_disk(&mut self) -> GuardVerdict {
        self.guard.check()
    }

    /// Returns true if changes are being captured.
    pub fn is_fallback(&self) -> bool {
        self.connections.is_fallback()
    }

    /// Reports the state of fallback mode.
    pub fn fallback_status(&mut self) -> ReplicationResult<FallbackStatus> {
        let sink = self.connections.sink();
        Ok(FallbackStatus {
            active: sink.is_active(),
            path: sink.path().to_path_buf(),
            records: sink.read_records()?.len(),
        })
    }

    /// Leaves fallback mode without replaying, archiving the capture log.
    pub fn reset_fallback(&mut self) -> ReplicationResult<Option<PathBuf>> {
        Ok(self.connections.reset_fallback()?)
    }

    /// Applies the capture log to the live directory and leaves fallback.
    ///
    /// Records whose effect is already present count as converged. A rename
    /// onto an existing DN is not one of them. On any other error the log
    /// is left in place and fallback stays active.
    pub fn replay_capture(&mut self) -> ReplicationResult<ReplayReport> {
        let records = self.connections.sink().read_records()?;
        let mut report = ReplayReport::default();
        if records.is_empty() && !self.connections.is_fallback() {
            return Ok(report);
        }

        let live = self.connections.connect_live()?;
        for record in &records {
            let result = match replay_record(live, record) {
                Err(e) if record.change == Change::Delete && e.class() == ErrorClass::StructuralError => {
                    info!(dn = %record.dn, "captured delete has children, deleting subtree");
                    delete_subtree(&mut Target::Live(&mut *live), &record.dn)
                }
                other => other,
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(e) if is_converged(record, &e) => {
                    debug!(dn = %record.dn, error = %e, "capture record already applied");
                    report.converged += 1;
                }
                Err(e) => {
                    error!(dn = %record.dn, op = record.change.keyword(), error = %e, "capture replay failed");
                    self.stats.record_error(&e);
                    return Err(e.into());
                }
            }
        }

        report.archive = self.connections.reset_fallback()?;
        self.stats.record_replayed(report.applied + report.converged);
        info!(applied = report.applied, converged = report.converged, "capture log replayed");
        Ok(report)
    }

    /// Bootstraps a fresh replica: wipes local state, generates a new bind
    /// secret and starts the directory server.
    pub fn initialize(&mut self) -> ReplicationResult<()> {
        self.clean()?;
        drop(self.connections.credentials().rotate());
        self.directory_service.start()?;
        std::thread::sleep(self.config.server_settle_delay);
        info!(base_dn = %self.config.base_dn, "replica initialized");
        Ok(())
    }

    /// Stops the directory server and removes the database, the capture
    /// log and all rename markers.
    pub fn clean(&mut self) -> ReplicationResult<()> {
        if let Err(e) = self.directory_service.stop() {
            warn!(error = %e, "failed to stop local directory server");
        }
        let removed = files::clear_dir(&self.config.database_dir)?;
        self.connections.sink().discard()?;
        self.applier.renames().markers().clear()?;
        self.connections.request_reconnect();
        info!(path = %self.config.database_dir.display(), removed, "replica state removed");
        Ok(())
    }
}

impl<C: Connector> std::fmt::Debug for ReplicationEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("config", &self.config)
            .field("applier", &self.applier)
            .field("schema", &self.schema)
            .field("guard", &self.guard)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Applies one capture record to `target`.
pub fn replay_record<T: DirectoryTarget + ?Sized>(target: &mut T, record: &Record) -> DirectoryResult<()> {
    match &record.change {
        Change::Add(attrs) => target.add(&record.dn, attrs),
        Change::Modify(mods) => target.modify(&record.dn, mods),
        Change::Delete => target.delete(&record.dn),
        Change::ModRdn {
            new_rdn,
            delete_old_rdn,
            new_superior,
        } => target.rename(&record.dn, new_rdn, *delete_old_rdn, new_superior.as_deref()),
    }
}

/// Errors meaning the record's effect is already in place.
fn is_converged(record: &Record, e: &DirectoryError) -> bool {
    match e {
        DirectoryError::Other { code, .. } => matches!(code, 16 | 20),
        _ if e.class() == ErrorClass::AlreadyExists => !matches!(record.change, Change::ModRdn { .. }),
        _ => e.is_no_such_object(),
    }
}
