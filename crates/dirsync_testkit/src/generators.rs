//! Property-based test generators using proptest.
//!
//! Attribute names are drawn from a small pool so that generated old and
//! new states overlap; the pool includes excluded attributes and the
//! membership attribute on purpose.

use dirsync_engine::{AttributeMap, OperationTag};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Attribute names used by the generators.
pub const ATTRIBUTE_POOL: &[&str] = &[
    "cn",
    "sn",
    "mail",
    "description",
    "telephoneNumber",
    "uniqueMember",
    "memberOf",
    "pwdChangedTime",
    "entryDN",
];

/// Strategy for generating attribute names from [`ATTRIBUTE_POOL`].
pub fn attribute_name_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(ATTRIBUTE_POOL)
}

/// Strategy for generating attribute values, binary ones included.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        4 => prop::string::string_regex("[a-z0-9 ]{1,12}")
            .expect("Invalid regex")
            .prop_map(String::into_bytes),
        1 => prop::collection::vec(any::<u8>(), 1..16),
    ]
}

/// Strategy for generating a set of values.
pub fn value_set_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::btree_set(value_strategy(), 1..=max.max(1))
        .prop_map(|set| set.into_iter().collect())
}

/// Strategy for generating entries. Every entry has an `objectClass`.
pub fn attribute_map_strategy() -> impl Strategy<Value = AttributeMap> {
    prop::collection::btree_map(attribute_name_strategy(), value_set_strategy(4), 0..ATTRIBUTE_POOL.len())
        .prop_map(|attrs: BTreeMap<&str, Vec<Vec<u8>>>| {
            let mut map = AttributeMap::new();
            map.insert("objectClass", vec![b"top".to_vec()]);
            for (name, values) in attrs {
                map.insert(name, values);
            }
            map
        })
}

/// Strategy for generating an old and new state of the same entry.
pub fn entry_pair_strategy() -> impl Strategy<Value = (AttributeMap, AttributeMap)> {
    (attribute_map_strategy(), attribute_map_strategy())
}

/// Strategy for generating a large membership list plus one new member.
pub fn membership_growth_strategy() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<u8>)> {
    prop::collection::btree_set("uid=[a-z]{3,8},dc=example,dc=org", 1..64).prop_flat_map(
        |members: BTreeSet<String>| {
            let existing: Vec<Vec<u8>> = members.iter().map(|m| m.clone().into_bytes()).collect();
            let taken = members.clone();
            (
                Just(existing),
                "uid=new[a-z]{3,8},dc=example,dc=org"
                    .prop_filter("member must be new", move |m| !taken.contains(m))
                    .prop_map(String::into_bytes),
            )
        },
    )
}

/// Strategy for generating DNs below `dc=example,dc=org`.
pub fn dn_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 1..4).prop_map(|parts| {
        let mut dn = String::new();
        for part in parts {
            dn.push_str(&format!("cn={},", part));
        }
        dn.push_str("dc=example,dc=org");
        dn
    })
}

/// Strategy for generating operation tags.
pub fn tag_strategy() -> impl Strategy<Value = OperationTag> {
    prop_oneof![
        Just(OperationTag::Add),
        Just(OperationTag::Modify),
        Just(OperationTag::Delete),
        Just(OperationTag::RenameHint),
    ]
}
