//! Notification sequences for common replication situations.

use crate::fixtures::{attrs, dn, person, uuid, TestReplica};
use dirsync_engine::{AttributeMap, ChangeNotification};

/// The two halves the watcher delivers for a rename of `from` to `to`.
///
/// `old` and `new` must carry the same entryUUID.
pub fn rename_pair(
    from: &str,
    old: AttributeMap,
    to: &str,
    new: AttributeMap,
) -> [ChangeNotification; 2] {
    [
        ChangeNotification::rename_hint(from, old),
        ChangeNotification::add(to, new),
    ]
}

/// Renames person `from` (entryUUID number `n`) to `to`.
pub fn rename_person(from: &str, to: &str, n: u32) -> [ChangeNotification; 2] {
    rename_pair(&dn(from), person(from, n), &dn(to), person(to, n))
}

/// Every notification of `changes` delivered twice in a row.
pub fn redelivered(changes: &[ChangeNotification]) -> Vec<ChangeNotification> {
    changes
        .iter()
        .flat_map(|change| [change.clone(), change.clone()])
        .collect()
}

/// Creates, modifies and deletes a person, ending with no entry.
pub fn person_lifecycle(cn: &str, n: u32) -> Vec<ChangeNotification> {
    let created = person(cn, n);
    let mut changed = created.clone();
    changed.insert("mail", vec![format!("{}@example.org", cn).into_bytes()]);
    vec![
        ChangeNotification::add(dn(cn), created.clone()),
        ChangeNotification::modify(dn(cn), changed.clone(), created),
        ChangeNotification::delete(dn(cn), changed),
    ]
}

/// The subschema entry with the given attribute types and object classes.
pub fn subschema(attribute_types: &[&str], object_classes: &[&str]) -> AttributeMap {
    attrs(&[
        ("attributeTypes", attribute_types),
        ("objectClasses", object_classes),
    ])
}

/// A replica already holding `count` people named `user0`, `user1`, ...
pub fn populated_replica(count: u32) -> TestReplica {
    let mut replica = TestReplica::new();
    for n in 0..count {
        let cn = format!("user{}", n);
        replica.apply(&ChangeNotification::add(dn(&cn), person(&cn, n)));
    }
    replica
}

/// An unrelated entry occupying `cn` with a fresh entryUUID.
pub fn squatter(cn: &str) -> AttributeMap {
    let id = uuid(0xdead);
    attrs(&[
        ("objectClass", &["top", "person"][..]),
        ("cn", &[cn][..]),
        ("sn", &["squatter"][..]),
        ("entryUUID", &[id.as_str()][..]),
    ])
}
