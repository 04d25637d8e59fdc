//! LDIF record model.

/// Ordered attribute list as used by add records: `(name, values)`.
pub type Attributes = Vec<(String, Vec<Vec<u8>>)>;

/// Kind of a single attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModOp {
    /// Add the given values.
    Add,
    /// Delete the given values, or the whole attribute when no values are given.
    Delete,
    /// Replace all values with the given values.
    Replace,
}

impl ModOp {
    /// Returns the LDIF keyword for this operation.
    pub fn keyword(&self) -> &'static str {
        match self {
            ModOp::Add => "add",
            ModOp::Delete => "delete",
            ModOp::Replace => "replace",
        }
    }

    /// Parses an LDIF modify keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "add" => Some(ModOp::Add),
            "delete" => Some(ModOp::Delete),
            "replace" => Some(ModOp::Replace),
            _ => None,
        }
    }
}

/// A single attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Operation kind.
    pub op: ModOp,
    /// Attribute name.
    pub attr: String,
    /// Values the operation applies to. Empty means "no values".
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    /// Creates a modification.
    pub fn new(op: ModOp, attr: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            op,
            attr: attr.into(),
            values,
        }
    }

    /// Shorthand for an ADD modification.
    pub fn add(attr: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self::new(ModOp::Add, attr, values)
    }

    /// Shorthand for a DELETE modification.
    pub fn delete(attr: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self::new(ModOp::Delete, attr, values)
    }

    /// Shorthand for a REPLACE modification.
    pub fn replace(attr: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self::new(ModOp::Replace, attr, values)
    }
}

/// The change carried by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Create the entry with the given attributes.
    Add(Attributes),
    /// Apply the modifications in order.
    Modify(Vec<Modification>),
    /// Remove the entry.
    Delete,
    /// Rename the entry.
    ModRdn {
        /// New relative distinguished name.
        new_rdn: String,
        /// Whether the old RDN values are removed from the entry.
        delete_old_rdn: bool,
        /// New parent, if the entry moves.
        new_superior: Option<String>,
    },
}

impl Change {
    /// Returns the LDIF changetype keyword.
    pub fn keyword(&self) -> &'static str {
        match self {
            Change::Add(_) => "add",
            Change::Modify(_) => "modify",
            Change::Delete => "delete",
            Change::ModRdn { .. } => "modrdn",
        }
    }
}

/// One LDIF change record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Distinguished name the change applies to.
    pub dn: String,
    /// The change itself.
    pub change: Change,
}

impl Record {
    /// Creates an add record.
    pub fn add(dn: impl Into<String>, attrs: Attributes) -> Self {
        Self {
            dn: dn.into(),
            change: Change::Add(attrs),
        }
    }

    /// Creates a modify record.
    pub fn modify(dn: impl Into<String>, mods: Vec<Modification>) -> Self {
        Self {
            dn: dn.into(),
            change: Change::Modify(mods),
        }
    }

    /// Creates a delete record.
    pub fn delete(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            change: Change::Delete,
        }
    }

    /// Creates a modrdn record.
    pub fn modrdn(
        dn: impl Into<String>,
        new_rdn: impl Into<String>,
        delete_old_rdn: bool,
        new_superior: Option<String>,
    ) -> Self {
        Self {
            dn: dn.into(),
            change: Change::ModRdn {
                new_rdn: new_rdn.into(),
                delete_old_rdn,
                new_superior,
            },
        }
    }
}
