//! Directory entries and change notifications.

use dirsync_ldif::{Attributes, ModOp, Modification};

/// Attribute map of a directory entry.
///
/// Names compare case-insensitively and keep their first spelling and
/// insertion order. Each attribute holds an ordered set of byte-string
/// values: duplicates are dropped on insertion. An attribute with no
/// values is the same as an absent attribute.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    attrs: Vec<(String, Vec<Vec<u8>>)>,
}

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from UTF-8 pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let mut map = Self::new();
        for (name, values) in pairs {
            map.insert(name, values.iter().map(|v| v.as_bytes().to_vec()).collect());
        }
        map
    }

    /// Number of attributes with at least one value.
    pub fn len(&self) -> usize {
        self.attrs.iter().filter(|(_, v)| !v.is_empty()).count()
    }

    /// Returns true if no attribute has a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the values of `name`, if present and non-empty.
    pub fn get(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .filter(|v| !v.is_empty())
    }

    /// Returns the first value of `name` as UTF-8.
    pub fn first_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Returns true if `name` holds `value`.
    pub fn contains_value(&self, name: &str, value: &[u8]) -> bool {
        self.get(name)
            .is_some_and(|values| values.iter().any(|v| v.as_slice() == value))
    }

    /// Sets the values of `name`, replacing existing ones.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Vec<u8>>) {
        let name = name.into();
        let values = dedup(values);
        match self.position(&name) {
            Some(pos) => self.attrs[pos].1 = values,
            None => self.attrs.push((name, values)),
        }
    }

    /// Removes `name` and returns its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<Vec<u8>>> {
        self.position(name).map(|pos| self.attrs.remove(pos).1)
    }

    /// Iterates non-empty attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.attrs
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Attribute names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(n, _)| n)
    }

    /// Applies one modification in place.
    ///
    /// Mirrors directory semantics: ADD appends missing values, DELETE
    /// without values drops the attribute, DELETE with values removes
    /// those values, REPLACE sets the value set.
    pub fn apply(&mut self, modification: &Modification) {
        let name = &modification.attr;
        match modification.op {
            ModOp::Add => {
                let mut values = self.get(name).map(<[_]>::to_vec).unwrap_or_default();
                values.extend(modification.values.iter().cloned());
                self.insert(name.clone(), values);
            }
            ModOp::Delete if modification.values.is_empty() => {
                self.remove(name);
            }
            ModOp::Delete => {
                if let Some(pos) = self.position(name) {
                    self.attrs[pos].1.retain(|v| !modification.values.contains(v));
                    if self.attrs[pos].1.is_empty() {
                        self.attrs.remove(pos);
                    }
                }
            }
            ModOp::Replace => {
                if modification.values.is_empty() {
                    self.remove(name);
                } else {
                    self.insert(name.clone(), modification.values.clone());
                }
            }
        }
    }

    /// Converts into the LDIF attribute list.
    pub fn to_attributes(&self) -> Attributes {
        self.iter()
            .map(|(n, v)| (n.to_string(), v.to_vec()))
            .collect()
    }

    /// Returns true if both maps hold the same value sets, ignoring the
    /// attributes for which `skip` returns true.
    pub fn same_values_except(&self, other: &AttributeMap, skip: impl Fn(&str) -> bool) -> bool {
        let mine: Vec<_> = self.iter().filter(|(n, _)| !skip(n)).collect();
        let theirs = other.iter().filter(|(n, _)| !skip(n)).count();
        mine.len() == theirs
            && mine.iter().all(|(name, values)| {
                other
                    .get(name)
                    .is_some_and(|o| same_value_set(values, o))
            })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl PartialEq for AttributeMap {
    fn eq(&self, other: &Self) -> bool {
        self.same_values_except(other, |_| false)
    }
}

impl Eq for AttributeMap {}

impl From<Attributes> for AttributeMap {
    fn from(attrs: Attributes) -> Self {
        let mut map = Self::new();
        for (name, values) in attrs {
            let mut merged = map.get(&name).map(<[_]>::to_vec).unwrap_or_default();
            merged.extend(values);
            map.insert(name, merged);
        }
        map
    }
}

/// Returns true if both slices hold the same set of values.
pub fn same_value_set(a: &[Vec<u8>], b: &[Vec<u8>]) -> bool {
    a.len() == b.len() && a.iter().all(|v| b.contains(v)) && b.iter().all(|v| a.contains(v))
}

fn dedup(values: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// A directory entry: DN plus attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Distinguished name.
    pub dn: String,
    /// Attributes.
    pub attrs: AttributeMap,
}

impl Entry {
    /// Creates an entry.
    pub fn new(dn: impl Into<String>, attrs: AttributeMap) -> Self {
        Self {
            dn: dn.into(),
            attrs,
        }
    }
}

/// Operation tag supplied by the watcher with each notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationTag {
    /// Entry was created.
    Add,
    /// Entry was modified, or the watcher does not say.
    Modify,
    /// Entry was deleted.
    Delete,
    /// First half of a rename: the entry disappeared from its old DN.
    RenameHint,
}

impl OperationTag {
    /// Parses the watcher's one-letter command codes or the long names.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "a" | "add" => Some(OperationTag::Add),
            "m" | "n" | "modify" => Some(OperationTag::Modify),
            "d" | "delete" => Some(OperationTag::Delete),
            "r" | "rename" | "modrdn" => Some(OperationTag::RenameHint),
            _ => None,
        }
    }
}

/// One change notification from the watcher.
///
/// Delivered at least once; applying the same notification twice must
/// leave the replica in the same state as applying it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// DN the change refers to.
    pub dn: String,
    /// Entry state after the change, absent for deletions.
    pub new: Option<AttributeMap>,
    /// Entry state before the change as the watcher saw it.
    pub old: Option<AttributeMap>,
    /// Operation tag.
    pub tag: OperationTag,
}

impl ChangeNotification {
    /// Creates a notification.
    pub fn new(
        dn: impl Into<String>,
        new: Option<AttributeMap>,
        old: Option<AttributeMap>,
        tag: OperationTag,
    ) -> Self {
        Self {
            dn: dn.into(),
            new: new.filter(|m| !m.is_empty()),
            old: old.filter(|m| !m.is_empty()),
            tag,
        }
    }

    /// An add notification.
    pub fn add(dn: impl Into<String>, new: AttributeMap) -> Self {
        Self::new(dn, Some(new), None, OperationTag::Add)
    }

    /// A modify notification.
    pub fn modify(dn: impl Into<String>, new: AttributeMap, old: AttributeMap) -> Self {
        Self::new(dn, Some(new), Some(old), OperationTag::Modify)
    }

    /// A delete notification.
    pub fn delete(dn: impl Into<String>, old: AttributeMap) -> Self {
        Self::new(dn, None, Some(old), OperationTag::Delete)
    }

    /// The first half of a rename.
    pub fn rename_hint(dn: impl Into<String>, old: AttributeMap) -> Self {
        Self::new(dn, None, Some(old), OperationTag::RenameHint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(values: &[&str]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut map = AttributeMap::new();
        map.insert("objectClass", bytes(&["top"]));
        map.insert("OBJECTCLASS", bytes(&["top", "person"]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["objectClass"]);
        assert_eq!(map.get("objectclass").unwrap().len(), 2);
    }

    #[test]
    fn duplicate_values_are_dropped() {
        let mut map = AttributeMap::new();
        map.insert("cn", bytes(&["a", "b", "a"]));
        assert_eq!(map.get("cn").unwrap(), bytes(&["a", "b"]).as_slice());
    }

    #[test]
    fn empty_value_list_is_absent() {
        let mut map = AttributeMap::new();
        map.insert("description", Vec::new());
        assert!(map.get("description").is_none());
        assert!(map.is_empty());
        assert_eq!(map, AttributeMap::new());
    }

    #[test]
    fn equality_ignores_value_order() {
        let a = AttributeMap::from_pairs([("cn", &["a", "b"][..]), ("sn", &["x"][..])]);
        let b = AttributeMap::from_pairs([("sn", &["x"][..]), ("CN", &["b", "a"][..])]);
        assert_eq!(a, b);
    }

    #[test]
    fn apply_modifications() {
        let mut map = AttributeMap::from_pairs([("member", &["a", "b"][..]), ("sn", &["x"][..])]);
        map.apply(&Modification::add("member", bytes(&["c"])));
        map.apply(&Modification::delete("member", bytes(&["a"])));
        map.apply(&Modification::delete("sn", vec![]));
        map.apply(&Modification::replace("cn", bytes(&["new"])));
        assert_eq!(
            map,
            AttributeMap::from_pairs([("member", &["b", "c"][..]), ("cn", &["new"][..])])
        );
    }

    #[test]
    fn operation_tags() {
        assert_eq!(OperationTag::parse("a"), Some(OperationTag::Add));
        assert_eq!(OperationTag::parse("n"), Some(OperationTag::Modify));
        assert_eq!(OperationTag::parse("r"), Some(OperationTag::RenameHint));
        assert_eq!(OperationTag::parse("Delete"), Some(OperationTag::Delete));
        assert_eq!(OperationTag::parse("x"), None);
    }

    #[test]
    fn empty_entries_become_absent() {
        let change = ChangeNotification::new("cn=x", Some(AttributeMap::new()), None, OperationTag::Modify);
        assert!(change.new.is_none());
    }
}
