//! Integration tests for the replication engine.

use dirsync_engine::{
    ApplyOutcome, ChangeNotification, GuardVerdict, InjectedFailure, ReplicationError, RetryConfig,
    ServiceAction, CURRENT_MARKER,
};
use dirsync_testkit::prelude::*;
use std::time::Duration;

#[test]
fn rename_from_bob_to_robert() {
    let mut replica = TestReplica::new();
    let old = attrs(&[("entryUUID", &[uuid(1).as_str()][..]), ("cn", &["bob"][..])]);
    let new = attrs(&[("entryUUID", &[uuid(1).as_str()][..]), ("cn", &["robert"][..])]);
    replica.apply(&ChangeNotification::add(dn("bob"), old.clone()));

    let outcomes = replica.apply_all(&rename_pair(&dn("bob"), old, &dn("robert"), new));

    assert_eq!(outcomes, vec![ApplyOutcome::Deferred, ApplyOutcome::Applied]);
    assert!(replica.entry(&dn("bob")).is_none());
    let robert = replica.entry(&dn("robert")).unwrap();
    assert_eq!(robert.get("cn").unwrap(), &[b"robert".to_vec()][..]);
    assert!(replica.engine.pending_renames().is_empty());
}

#[test]
fn rename_onto_occupied_dn_backs_up_the_occupant() {
    let mut replica = populated_replica(1);
    replica.apply(&ChangeNotification::add(dn("target"), squatter("target")));

    replica.apply_all(&rename_person("user0", "target", 0));

    let moved = replica.entry(&dn("target")).unwrap();
    assert_eq!(moved.first_str("entryUUID"), Some(uuid(0).as_str()));
    assert!(replica.entry(&dn("user0")).is_none());
    assert_eq!(replica.backups().len(), 1);
    let backup = std::fs::read_to_string(&replica.backups()[0]).unwrap();
    assert!(backup.contains("squatter"));
}

#[test]
fn rename_whose_add_never_arrives_is_cleaned_up() {
    let mut replica = populated_replica(2);
    replica.apply(&ChangeNotification::rename_hint(dn("user0"), person("user0", 0)));
    replica.apply_all(&rename_person("user1", "anna", 1));

    let mut changed = person("anna", 1);
    changed.insert("mail", vec![b"anna@example.org".to_vec()]);
    let outcome = replica.apply(&ChangeNotification::modify(dn("anna"), changed, person("anna", 1)));

    assert_eq!(outcome, ApplyOutcome::Applied);
    assert!(replica.entry(&dn("user0")).is_none());
    assert!(replica.entry(&dn("user1")).is_none());
    assert_eq!(replica.entry(&dn("anna")).unwrap().first_str("mail"), Some("anna@example.org"));
    assert!(replica.engine.pending_renames().is_empty());
    assert_eq!(replica.backups().len(), 1);
}

#[test]
fn rename_halves_survive_redelivery() {
    let mut replica = populated_replica(1);
    replica.apply_all(&redelivered(&rename_person("user0", "moved", 0)));

    assert!(replica.entry(&dn("user0")).is_none());
    assert_eq!(replica.entry(&dn("moved")).unwrap().first_str("cn"), Some("moved"));
    assert!(replica.engine.pending_renames().is_empty());
    assert!(replica.backups().is_empty());
}

#[test]
fn lifecycle_is_idempotent_under_redelivery() {
    let mut once = TestReplica::new();
    once.apply_all(&person_lifecycle("ann", 1)[..2]);

    let mut twice = TestReplica::new();
    twice.apply_all(&redelivered(&person_lifecycle("ann", 1)[..2]));

    assert_eq!(once.snapshot(), twice.snapshot());

    twice.apply_all(&redelivered(&person_lifecycle("ann", 1)[2..]));
    assert!(twice.snapshot().is_empty());
}

#[test]
fn membership_change_adds_one_member() {
    let mut replica = TestReplica::new();
    let before = group("staff", &[dn("a"), dn("b")]);
    let after = group("staff", &[dn("a"), dn("b"), dn("c")]);
    replica.apply(&ChangeNotification::add(dn("staff"), before.clone()));
    replica.apply(&ChangeNotification::modify(dn("staff"), after.clone(), before));

    assert_eq!(replica.entry(&dn("staff")).unwrap(), after);
}

#[test]
fn unreachable_directory_switches_to_fallback_until_reset() {
    let mut replica = TestReplica::with_config(|c| c.with_retry(RetryConfig::new(2, Duration::ZERO)));
    replica.apply(&ChangeNotification::add(dn("warm"), person("warm", 9)));
    replica.directory.set_available(false);

    let outcome = replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));
    assert_eq!(outcome, ApplyOutcome::Deferred);
    assert!(replica.engine.is_fallback());

    replica.directory.set_available(true);
    let outcome = replica.apply(&ChangeNotification::add(dn("bea"), person("bea", 2)));
    assert_eq!(outcome, ApplyOutcome::Deferred);
    assert!(replica.entry(&dn("bea")).is_none());
    assert_eq!(replica.engine.fallback_status().unwrap().records, 2);

    let report = replica.engine.replay_capture().unwrap();
    assert_eq!(report.applied, 2);
    assert!(!replica.engine.is_fallback());
    assert_eq!(replica.archived_logs().len(), 1);
    assert!(replica.entry(&dn("ann")).is_some());
    assert!(replica.entry(&dn("bea")).is_some());

    let outcome = replica.apply(&ChangeNotification::add(dn("cid"), person("cid", 3)));
    assert_eq!(outcome, ApplyOutcome::Applied);
}

#[test]
fn capture_log_only_grows() {
    let mut replica = TestReplica::new();
    replica.engine.connections().enter_fallback();
    let log = replica.config().capture_log.clone();

    let mut last = 0;
    for change in person_lifecycle("ann", 1) {
        replica.apply(&change);
        let len = std::fs::metadata(&log).unwrap().len();
        assert!(len > last);
        last = len;
    }
}

#[test]
fn transient_failures_recover_without_fallback() {
    let mut replica = TestReplica::new();
    replica.apply(&ChangeNotification::add(dn("warm"), person("warm", 9)));
    replica.directory.inject(InjectedFailure::Unavailable);

    let outcome = replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert!(!replica.engine.is_fallback());
}

#[test]
fn schema_is_written_superiors_first() {
    let mut replica = TestReplica::new();
    let schema = subschema(
        &[
            "( 1.1 NAME 'x' SUP y )",
            "( 1.2 NAME 'y' SUP z )",
            "( 1.3 NAME 'z' )",
        ],
        &["( 1.9 NAME 'holder' SUP top MAY ( x $ y ) )"],
    );
    replica.apply(&ChangeNotification::modify("cn=Subschema", schema, AttributeMap::new()));

    let written = std::fs::read_to_string(&replica.config().schema_file).unwrap();
    let z = written.find("'z'").unwrap();
    let y = written.find("'y'").unwrap();
    let x = written.find("'x'").unwrap();
    assert!(z < y && y < x);
    assert!(written.contains("objectclass ( 1.9 NAME 'holder'"));
    assert_eq!(replica.directory_service.count(ServiceAction::Restart), 1);
    assert_eq!(replica.engine.stats().schema_updates(), 1);
}

#[test]
fn disk_pressure_halts_with_one_mail() {
    let mut replica = TestReplica::new();
    replica.probe.set(1024);

    for _ in 0..3 {
        let err = replica
            .try_apply(&ChangeNotification::add(dn("ann"), person("ann", 1)))
            .unwrap_err();
        assert!(matches!(err, ReplicationError::DiskSpaceExhausted { .. }));
    }
    assert_eq!(replica.notifier.sent().len(), 1);
    assert!(replica.supervisor.count(ServiceAction::Stop) >= 1);
    assert!(replica.snapshot().is_empty());

    replica.probe.set(u64::MAX);
    assert_eq!(replica.engine.check_disk(), GuardVerdict::Proceed);
    replica.apply(&ChangeNotification::add(dn("ann"), person("ann", 1)));
    assert!(replica.entry(&dn("ann")).is_some());
}

#[test]
fn corrupt_current_marker_means_no_marker() {
    let mut replica = populated_replica(1);
    replica.apply(&ChangeNotification::rename_hint(dn("user0"), person("user0", 0)));
    std::fs::write(replica.config().marker_dir.join(CURRENT_MARKER), "not a uuid").unwrap();

    let outcome = replica.apply(&ChangeNotification::add(dn("other"), person("other", 0)));

    assert_eq!(outcome, ApplyOutcome::Applied);
    assert!(replica.entry(&dn("other")).is_some());
    assert!(replica.entry(&dn("user0")).is_none());
    assert_eq!(replica.backups().len(), 1);
    assert!(replica.engine.pending_renames().is_empty());
}
