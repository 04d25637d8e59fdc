//! Attribute-level diffing between two entry states.
//!
//! All functions here are pure. Excluded attributes are owned by the
//! replica itself and never appear in any output.

use crate::entry::{same_value_set, AttributeMap};
use dirsync_ldif::{Attributes, Modification};

/// Attributes that are never diffed or replicated.
pub const EXCLUDED_ATTRIBUTES: &[&str] = &[
    "subschemaSubentry",
    "hasSubordinates",
    "entryDN",
    "memberOf",
    "pwdChangedTime",
    "pwdAccountLockedTime",
    "pwdFailureTime",
    "pwdHistory",
    "pwdGraceUseTime",
    "pwdReset",
    "pwdPolicySubentry",
];

/// Group membership attribute whose changes are split into ADD and DELETE.
pub const MEMBERSHIP_ATTRIBUTE: &str = "uniqueMember";

/// Returns true if `attr` belongs to the exclusion set.
pub fn is_excluded(attr: &str) -> bool {
    EXCLUDED_ATTRIBUTES
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(attr))
}

/// Attribute list for creating `new`, in `new`'s order.
pub fn compute_add(new: &AttributeMap) -> Attributes {
    new.iter()
        .filter(|(name, _)| !is_excluded(name))
        .map(|(name, values)| (name.to_string(), values.to_vec()))
        .collect()
}

/// Modifications turning `old` into `new`.
///
/// New attributes become ADD, changed ones REPLACE and vanished ones a
/// DELETE without values. The membership attribute is the exception:
/// added and removed members are emitted as separate ADD and DELETE.
pub fn compute_modify(old: &AttributeMap, new: &AttributeMap) -> Vec<Modification> {
    let mut mods = Vec::new();

    for (name, values) in new.iter().filter(|(name, _)| !is_excluded(name)) {
        let Some(previous) = old.get(name) else {
            mods.push(Modification::add(name, values.to_vec()));
            continue;
        };
        if same_value_set(previous, values) {
            continue;
        }
        if name.eq_ignore_ascii_case(MEMBERSHIP_ATTRIBUTE) {
            let added: Vec<_> = values
                .iter()
                .filter(|v| !previous.contains(v))
                .cloned()
                .collect();
            let removed: Vec<_> = previous
                .iter()
                .filter(|v| !values.contains(v))
                .cloned()
                .collect();
            if !added.is_empty() {
                mods.push(Modification::add(name, added));
            }
            if !removed.is_empty() {
                mods.push(Modification::delete(name, removed));
            }
        } else {
            mods.push(Modification::replace(name, values.to_vec()));
        }
    }

    for name in old.names().filter(|name| !is_excluded(name)) {
        if new.get(name).is_none() {
            mods.push(Modification::delete(name, Vec::new()));
        }
    }

    mods
}

/// A REPLACE for every replicated attribute of `new`.
pub fn compute_replace_all(new: &AttributeMap) -> Vec<Modification> {
    new.iter()
        .filter(|(name, _)| !is_excluded(name))
        .map(|(name, values)| Modification::replace(name, values.to_vec()))
        .collect()
}

/// Copy of `attrs` without excluded attributes.
pub fn strip_excluded(attrs: &AttributeMap) -> AttributeMap {
    let mut out = AttributeMap::new();
    for (name, values) in attrs.iter().filter(|(name, _)| !is_excluded(name)) {
        out.insert(name, values.to_vec());
    }
    out
}
