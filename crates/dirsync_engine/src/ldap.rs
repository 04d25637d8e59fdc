//! Live session on the local directory over `ldap3`.

use crate::connection::Connector;
use crate::dn;
use crate::entry::{AttributeMap, Entry};
use crate::error::{DirectoryError, DirectoryResult};
use crate::target::{DirectoryTarget, LiveDirectory};
use dirsync_ldif::{Attributes, ModOp, Modification};
use ldap3::{LdapConn, LdapConnSettings, LdapError, LdapResult, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace};

const ALL_ATTRIBUTES: [&str; 2] = ["*", "+"];
const NO_SUCH_OBJECT: u32 = 32;

/// Opens `ldap3` sessions on a fixed URL.
#[derive(Debug, Clone)]
pub struct LdapConnector {
    url: String,
    timeout: Duration,
}

impl LdapConnector {
    /// Creates a connector for `url` (`ldap://`, `ldaps://` or `ldapi://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for LdapConnector {
    type Connection = LdapDirectory;

    fn connect(&mut self, bind_dn: &str, secret: &str) -> DirectoryResult<LdapDirectory> {
        debug!(url = %self.url, bind_dn = %bind_dn, "connecting to local directory");
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let mut conn = LdapConn::with_settings(settings, &self.url).map_err(transport)?;
        let result = conn.simple_bind(bind_dn, secret).map_err(transport)?;
        check(result, bind_dn)?;
        Ok(LdapDirectory { conn })
    }
}

/// Bound session on the local directory.
pub struct LdapDirectory {
    conn: LdapConn,
}

impl LdapDirectory {
    fn search(&mut self, base: &str, scope: Scope) -> DirectoryResult<Vec<Entry>> {
        let result = self
            .conn
            .search(base, scope, "(objectClass=*)", ALL_ATTRIBUTES.to_vec())
            .map_err(transport)?;
        let (entries, status) = (result.0, result.1);
        if status.rc == NO_SUCH_OBJECT {
            return Ok(Vec::new());
        }
        check(status, base)?;
        Ok(entries
            .into_iter()
            .map(|e| to_entry(SearchEntry::construct(e)))
            .collect())
    }
}

impl Drop for LdapDirectory {
    fn drop(&mut self) {
        if let Err(e) = self.conn.unbind() {
            trace!(error = %e, "unbind failed");
        }
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory").finish_non_exhaustive()
    }
}

impl DirectoryTarget for LdapDirectory {
    fn add(&mut self, dn: &str, attrs: &Attributes) -> DirectoryResult<()> {
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attrs
            .iter()
            .map(|(name, values)| (name.as_bytes().to_vec(), values.iter().cloned().collect()))
            .collect();
        let result = self.conn.add(dn, attrs).map_err(transport)?;
        check(result, dn)
    }

    fn modify(&mut self, dn: &str, mods: &[Modification]) -> DirectoryResult<()> {
        if mods.is_empty() {
            return Ok(());
        }
        let mods: Vec<Mod<Vec<u8>>> = mods.iter().map(to_mod).collect();
        let result = self.conn.modify(dn, mods).map_err(transport)?;
        check(result, dn)
    }

    fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        let result = self.conn.delete(dn).map_err(transport)?;
        check(result, dn)
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        let result = self
            .conn
            .modifydn(dn, new_rdn, delete_old_rdn, new_superior)
            .map_err(transport)?;
        check(result, dn)
    }
}

impl LiveDirectory for LdapDirectory {
    fn read_entry(&mut self, dn: &str) -> DirectoryResult<Option<AttributeMap>> {
        Ok(self
            .search(dn, Scope::Base)?
            .into_iter()
            .next()
            .map(|entry| entry.attrs))
    }

    fn read_subtree(&mut self, dn: &str) -> DirectoryResult<Vec<Entry>> {
        let mut entries = self.search(dn, Scope::Subtree)?;
        entries.sort_by_key(|e| dn::depth(&e.dn));
        Ok(entries)
    }
}

fn transport(e: LdapError) -> DirectoryError {
    match e {
        LdapError::LdapResult { result } => {
            DirectoryError::from_result_code(result.rc, &result.matched, result.text)
        }
        other => DirectoryError::unavailable(other.to_string()),
    }
}

fn check(result: LdapResult, dn: &str) -> DirectoryResult<()> {
    if result.rc == 0 {
        return Ok(());
    }
    Err(DirectoryError::from_result_code(result.rc, dn, result.text))
}

fn to_mod(m: &Modification) -> Mod<Vec<u8>> {
    let attr = m.attr.as_bytes().to_vec();
    let values: HashSet<Vec<u8>> = m.values.iter().cloned().collect();
    match m.op {
        ModOp::Add => Mod::Add(attr, values),
        ModOp::Delete => Mod::Delete(attr, values),
        ModOp::Replace => Mod::Replace(attr, values),
    }
}

fn to_entry(entry: SearchEntry) -> Entry {
    let mut attrs = AttributeMap::new();
    for (name, values) in entry.attrs {
        attrs.insert(name, values.into_iter().map(String::into_bytes).collect());
    }
    for (name, values) in entry.bin_attrs {
        attrs.insert(name, values);
    }
    Entry::new(entry.dn, attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifications_keep_their_operation() {
        let m = to_mod(&Modification::add("uniqueMember", vec![b"cn=a".to_vec()]));
        assert!(matches!(m, Mod::Add(ref a, ref v) if a == b"uniqueMember" && v.len() == 1));

        let m = to_mod(&Modification::delete("description", Vec::new()));
        assert!(matches!(m, Mod::Delete(_, ref v) if v.is_empty()));

        let m = to_mod(&Modification::replace("cn", vec![b"x".to_vec(), b"y".to_vec()]));
        assert!(matches!(m, Mod::Replace(_, ref v) if v.len() == 2));
    }

    #[test]
    fn search_entries_become_attribute_maps() {
        let mut attrs = std::collections::HashMap::new();
        attrs.insert("cn".to_string(), vec!["bob".to_string()]);
        let mut bin_attrs = std::collections::HashMap::new();
        bin_attrs.insert("jpegPhoto".to_string(), vec![vec![0xff, 0xd8]]);
        let entry = to_entry(SearchEntry {
            dn: "cn=bob,dc=x".to_string(),
            attrs,
            bin_attrs,
        });
        assert_eq!(entry.dn, "cn=bob,dc=x");
        assert_eq!(entry.attrs.first_str("cn"), Some("bob"));
        assert_eq!(entry.attrs.get("jpegphoto"), Some(&[vec![0xff, 0xd8]][..]));
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let mut connector = LdapConnector::new("ldap://127.0.0.1:1").with_timeout(Duration::from_millis(200));
        let err = connector.connect("cn=admin", "secret").unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable { .. }));
    }
}
