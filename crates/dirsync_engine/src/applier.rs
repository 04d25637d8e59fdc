//! Applying change notifications to the local directory.

use crate::config::{RecoveryPolicy, ReplicationConfig};
use crate::connection::{ConnectionManager, Connector};
use crate::diff::{compute_add, compute_modify, is_excluded};
use crate::entry::{AttributeMap, ChangeNotification, OperationTag};
use crate::error::{DirectoryError, DirectoryResult, ErrorClass, ReplicationError, ReplicationResult};
use crate::rename::{entry_uuid, RenameCoordinator, Resolution};
use crate::subtree::delete_subtree;
use crate::target::{DirectoryTarget, LiveDirectory, Target};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn, Level};

/// Terminal outcome of applying one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The change was applied to the local directory.
    Applied,
    /// The change collided with existing state and was converged into a modify.
    Reconciled,
    /// The local schema rejected the change; it was dropped.
    SkippedFatal,
    /// The change was captured or is waiting for its second half.
    Deferred,
}

/// What the retry loop does after a failed attempt.
enum Step {
    Done(ApplyOutcome),
    Retry,
    Reconcile(AttributeMap),
    Fallback,
    Reconnect,
    Fail(ReplicationError),
}

/// Dispatches notifications to add, modify, delete or rename and maps
/// directory errors to recovery actions.
#[derive(Debug, Clone)]
pub struct EntryApplier {
    policy: RecoveryPolicy,
    transient_budget: u32,
    transient_delay: Duration,
    max_attempts: u32,
    renames: RenameCoordinator,
}

impl EntryApplier {
    /// Creates an applier.
    pub fn new(config: &ReplicationConfig, renames: RenameCoordinator) -> Self {
        Self {
            policy: config.recovery_policy,
            transient_budget: config.retry.max_attempts,
            transient_delay: config.retry.delay,
            max_attempts: config.max_apply_attempts.max(1),
            renames,
        }
    }

    /// The rename coordinator.
    pub fn renames(&self) -> &RenameCoordinator {
        &self.renames
    }

    /// Applies `change`, retrying within a bounded number of attempts.
    ///
    /// Hard errors are returned only for the restart policy and when the
    /// attempt bound is exhausted.
    pub fn apply<C: Connector>(
        &self,
        connections: &mut ConnectionManager<C>,
        change: &ChangeNotification,
    ) -> ReplicationResult<ApplyOutcome> {
        let dn = change.dn.as_str();
        let mut force_fallback = false;
        let mut transient = 0;
        let mut old_override = None;
        let mut reconciled = false;
        let mut attempt = 0;

        // Transient failures draw on their own budget and do not count as attempts.
        while attempt < self.max_attempts {
            attempt += 1;
            let step = {
                let mut target = connections.get_connection(force_fallback);
                match self.apply_once(&mut target, change, old_override.take()) {
                    Ok(outcome) => Step::Done(outcome),
                    Err(e) => self.classify(&mut target, dn, attempt, e),
                }
            };

            match step {
                Step::Done(ApplyOutcome::Applied) if reconciled => {
                    return Ok(ApplyOutcome::Reconciled)
                }
                Step::Done(outcome) => return Ok(outcome),
                Step::Retry => {}
                Step::Reconcile(current) => {
                    old_override = Some(current);
                    reconciled = true;
                }
                Step::Reconnect => {
                    connections.request_reconnect();
                    attempt -= 1;
                    transient += 1;
                    if transient >= self.transient_budget {
                        warn!(dn = %dn, attempts = transient, "retry budget exhausted, switching to fallback");
                        force_fallback = true;
                    } else {
                        std::thread::sleep(self.transient_delay);
                    }
                }
                Step::Fallback => {
                    connections.request_reconnect();
                    force_fallback = true;
                }
                Step::Fail(e) => return Err(e),
            }
        }

        error!(dn = %dn, attempts = self.max_attempts, "giving up on notification");
        Err(ReplicationError::RetriesExhausted {
            dn: dn.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn classify<L: LiveDirectory>(
        &self,
        target: &mut Target<'_, L>,
        dn: &str,
        attempt: u32,
        e: DirectoryError,
    ) -> Step {
        match e.class() {
            ErrorClass::TransientConnectivity => {
                warn!(dn = %dn, attempt, error = %e, "local directory unavailable");
                Step::Reconnect
            }
            ErrorClass::AlreadyExists => {
                warn!(dn = %dn, attempt, "entry already exists, reconciling");
                match target.read_entry(dn) {
                    Ok(Some(current)) => Step::Reconcile(current),
                    Ok(None) => Step::Retry,
                    Err(read_error) => {
                        error!(dn = %dn, error = %read_error, "cannot read conflicting entry");
                        Step::Fallback
                    }
                }
            }
            ErrorClass::SchemaViolation => {
                error!(dn = %dn, error = %e, "schema violation, dropping change");
                Step::Done(ApplyOutcome::SkippedFatal)
            }
            _ if e.is_no_such_object() => {
                debug!(dn = %dn, attempt, "entry vanished, retrying");
                Step::Retry
            }
            ErrorClass::StructuralError | ErrorClass::Unclassified => match self.policy {
                RecoveryPolicy::Restart => {
                    error!(dn = %dn, error = %e, "unhandled directory error, restart required");
                    Step::Fail(ReplicationError::RestartRequired {
                        dn: dn.to_string(),
                        source: e,
                    })
                }
                RecoveryPolicy::Fallback => {
                    error!(dn = %dn, error = %e, "unhandled directory error, switching to fallback");
                    Step::Fallback
                }
            },
        }
    }

    fn apply_once<L: LiveDirectory>(
        &self,
        target: &mut Target<'_, L>,
        change: &ChangeNotification,
        old_override: Option<AttributeMap>,
    ) -> DirectoryResult<ApplyOutcome> {
        let dn = change.dn.as_str();

        if change.new.is_none() && change.tag == OperationTag::RenameHint {
            match change.old.as_ref().and_then(entry_uuid) {
                Some(uuid) => {
                    if self.renames.begin(target, uuid, dn)? {
                        return Ok(ApplyOutcome::Deferred);
                    }
                }
                None => warn!(dn = %dn, "rename hint without entryUUID, deleting instead"),
            }
        }

        let mut old = match old_override {
            Some(old) => Some(old),
            None if target.is_capture() => change.old.clone(),
            None => {
                let local = target.read_entry(dn)?;
                if tracing::enabled!(Level::TRACE) {
                    cross_check(dn, local.as_ref(), change.old.as_ref());
                }
                local
            }
        };

        match &change.new {
            Some(new) => {
                if change.tag == OperationTag::Add || old.is_none() {
                    if let Some(uuid) = entry_uuid(new) {
                        match self.renames.resolve(target, dn, new, uuid)? {
                            Resolution::Idle => {}
                            Resolution::Captured => return Ok(ApplyOutcome::Deferred),
                            Resolution::Renamed { .. }
                            | Resolution::Recreated
                            | Resolution::Abandoned { .. } => old = target.read_entry(dn)?,
                        }
                    }
                }
                match old {
                    None => {
                        debug!(dn = %dn, op = "add", "applying");
                        target.add(dn, &compute_add(new))?;
                    }
                    Some(old) => {
                        let mods = compute_modify(&old, new);
                        if mods.is_empty() {
                            trace!(dn = %dn, "entry unchanged");
                        } else {
                            debug!(dn = %dn, op = "modify", mods = mods.len(), "applying");
                            target.modify(dn, &mods)?;
                        }
                    }
                }
            }
            None => {
                if old.is_none() {
                    debug!(dn = %dn, "entry already absent");
                    return Ok(outcome(target));
                }
                debug!(dn = %dn, op = "delete", "applying");
                match target.delete(dn) {
                    Ok(()) => {}
                    Err(e) if e.is_no_such_object() => {}
                    Err(e) if e.class() == ErrorClass::StructuralError => {
                        info!(dn = %dn, "entry has children, deleting subtree");
                        delete_subtree(target, dn)?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(outcome(target))
    }
}

fn outcome<L: LiveDirectory>(target: &Target<'_, L>) -> ApplyOutcome {
    if target.is_capture() {
        ApplyOutcome::Deferred
    } else {
        ApplyOutcome::Applied
    }
}

/// Logs differences between the local entry and the one the watcher saw.
fn cross_check(dn: &str, local: Option<&AttributeMap>, supplied: Option<&AttributeMap>) {
    let empty = AttributeMap::new();
    let local = local.unwrap_or(&empty);
    let supplied = supplied.unwrap_or(&empty);
    if local.same_values_except(supplied, is_excluded) {
        return;
    }
    for (name, values) in local.iter().filter(|(name, _)| !is_excluded(name)) {
        match supplied.get(name) {
            None => warn!(dn = %dn, attr = name, "attribute missing from watcher state"),
            Some(theirs) if theirs.len() != values.len() || values.iter().any(|v| !theirs.contains(v)) => {
                warn!(dn = %dn, attr = name, "attribute values differ from watcher state")
            }
            Some(_) => {}
        }
    }
    for name in supplied.names().filter(|name| !is_excluded(name)) {
        if local.get(name).is_none() {
            warn!(dn = %dn, attr = name, "attribute missing from local entry");
        }
    }
    warn!(dn = %dn, "local entry and watcher state do not match");
}
