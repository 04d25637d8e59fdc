//! Schema synchronization.
//!
//! The upstream schema arrives as a notification for the subschema entry.
//! Its attribute types and object classes are rewritten into a slapd
//! schema file, ordered so that every definition follows the definitions
//! it names as `SUP`, and the local server is restarted to load it.
//!
//! Definitions the server compiles in itself are skipped entirely; see
//! [`BUILTIN_OIDS`].

use crate::config::ReplicationConfig;
use crate::dn;
use crate::entry::AttributeMap;
use crate::error::ReplicationResult;
use crate::files;
use crate::service::ServiceControl;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// DN of the subschema entry.
pub const SCHEMA_DN: &str = "cn=Subschema";

/// Header written at the top of a generated schema file.
pub const SCHEMA_HEADER: &str = "# This schema was automatically replicated from the master server\n\
                                 # Please do not edit this file\n\n";

/// OIDs of definitions built into slapd. These are never written.
pub const BUILTIN_OIDS: &[&str] = &[
    // attribute types
    "1.3.6.1.1.4",
    "1.3.6.1.1.5",
    "1.3.6.1.1.16.4",
    "1.3.6.1.1.20",
    "1.3.6.1.4.1.1466.101.120.5",
    "1.3.6.1.4.1.1466.101.120.6",
    "1.3.6.1.4.1.1466.101.120.7",
    "1.3.6.1.4.1.1466.101.120.13",
    "1.3.6.1.4.1.1466.101.120.14",
    "1.3.6.1.4.1.1466.101.120.15",
    "1.3.6.1.4.1.1466.101.120.16",
    "1.3.6.1.4.1.4203.1.3.1",
    "1.3.6.1.4.1.4203.1.3.2",
    "1.3.6.1.4.1.4203.1.3.3",
    "1.3.6.1.4.1.4203.1.3.4",
    "1.3.6.1.4.1.4203.1.3.5",
    "1.3.6.1.4.1.4203.666.1.5",
    "1.3.6.1.4.1.4203.666.1.6",
    "1.3.6.1.4.1.4203.666.1.7",
    "1.3.6.1.4.1.4203.666.1.8",
    "1.3.6.1.4.1.4203.666.1.9",
    "1.3.6.1.4.1.4203.666.1.10",
    "1.3.6.1.4.1.4203.666.1.11",
    "1.3.6.1.4.1.4203.666.1.12",
    "1.3.6.1.4.1.4203.666.1.13",
    "1.3.6.1.4.1.4203.666.1.25",
    "2.5.4.0",
    "2.5.4.1",
    "2.5.4.3",
    "2.5.4.13",
    "2.5.4.34",
    "2.5.4.35",
    "2.5.4.41",
    "2.5.4.49",
    "2.5.18.1",
    "2.5.18.2",
    "2.5.18.3",
    "2.5.18.4",
    "2.5.18.5",
    "2.5.18.6",
    "2.5.18.7",
    "2.5.18.8",
    "2.5.18.9",
    "2.5.18.10",
    "2.5.18.12",
    "2.5.21.1",
    "2.5.21.2",
    "2.5.21.4",
    "2.5.21.5",
    "2.5.21.6",
    "2.5.21.7",
    "2.5.21.8",
    "2.5.21.9",
    "2.16.840.1.113730.3.1.34",
    "0.9.2342.19200300.100.1.1",
    "1.3.6.1.1.1.1.0",
    "1.3.6.1.1.1.1.1",
    // object classes
    "1.3.6.1.4.1.1466.101.120.111",
    "1.3.6.1.4.1.4203.1.4.1",
    "1.3.6.1.4.1.4203.666.3.4",
    "1.3.6.1.4.1.4203.666.3.5",
    "1.3.6.1.4.1.4203.666.3.6",
    "2.5.6.0",
    "2.5.6.1",
    "2.5.17.0",
    "2.5.20.1",
    "2.16.840.1.113730.3.2.6",
];

/// Returns true if `dn` names the subschema entry.
pub fn is_schema_dn(dn: &str) -> bool {
    dn::same(dn, SCHEMA_DN)
}

/// Returns true if `oid` is compiled into the server.
pub fn is_builtin(oid: &str) -> bool {
    BUILTIN_OIDS.contains(&oid)
}

/// Schema definition category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// `attributeTypes` value.
    AttributeType,
    /// `objectClasses` value.
    ObjectClass,
}

impl DefinitionKind {
    /// Attribute on the subschema entry holding this kind.
    pub fn attribute(self) -> &'static str {
        match self {
            DefinitionKind::AttributeType => "attributeTypes",
            DefinitionKind::ObjectClass => "objectClasses",
        }
    }

    /// Directive introducing this kind in a slapd schema file.
    pub fn directive(self) -> &'static str {
        match self {
            DefinitionKind::AttributeType => "attributetype",
            DefinitionKind::ObjectClass => "objectclass",
        }
    }
}

/// A parsed attribute type or object class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDefinition {
    /// Numeric OID.
    pub oid: String,
    /// Declared names.
    pub names: Vec<String>,
    /// Superior references, by name or OID.
    pub superiors: Vec<String>,
    /// Definition text as received.
    pub text: String,
}

impl SchemaDefinition {
    /// Parses an RFC 4512 definition. Returns `None` if no OID is found.
    pub fn parse(text: &str) -> Option<Self> {
        let tokens = tokenize(text);
        let mut iter = tokens.iter().peekable();
        if iter.peek().map(|t| t.as_str()) == Some("(") {
            iter.next();
        }
        let oid = iter.next().filter(|t| !is_punct(t))?.clone();

        let mut names = Vec::new();
        let mut superiors = Vec::new();
        while let Some(token) = iter.next() {
            let target = if token.eq_ignore_ascii_case("NAME") {
                &mut names
            } else if token.eq_ignore_ascii_case("SUP") {
                &mut superiors
            } else {
                continue;
            };
            match iter.next() {
                Some(t) if t == "(" => {
                    for t in iter.by_ref() {
                        if t == ")" {
                            break;
                        }
                        if t != "$" {
                            target.push(unquote(t).to_string());
                        }
                    }
                }
                Some(t) if !is_punct(t) => target.push(unquote(t).to_string()),
                _ => {}
            }
        }

        Some(Self {
            oid,
            names,
            superiors,
            text: collapse_unquoted(text),
        })
    }

    /// Returns true if `reference` is this definition's OID or one of its names.
    pub fn answers_to(&self, reference: &str) -> bool {
        self.oid == reference || self.names.iter().any(|n| n.eq_ignore_ascii_case(reference))
    }
}

/// Collapses whitespace runs outside quoted strings to one space.
fn collapse_unquoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quoted = false;
    let mut pending_space = false;
    for c in text.trim().chars() {
        if !quoted && c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '\'' {
            quoted = !quoted;
        }
        out.push(c);
    }
    out
}

fn is_punct(token: &str) -> bool {
    matches!(token, "(" | ")" | "$")
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(token)
}

/// Splits a definition into parentheses, `$`, quoted strings and words.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '$' => {
                tokens.push(c.to_string());
                chars.next();
            }
            '\'' => {
                let mut token = String::from('\'');
                chars.next();
                for c in chars.by_ref() {
                    token.push(c);
                    if c == '\'' {
                        break;
                    }
                }
                tokens.push(token);
            }
            _ => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '$' | '\'') {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }
    tokens
}

/// Orders definitions so superiors come first.
///
/// Built-in OIDs are dropped. A superior that names no supplied definition
/// is treated as satisfied. Every remaining definition appears exactly
/// once, cycles included.
pub fn order_definitions(definitions: &[SchemaDefinition]) -> Vec<&SchemaDefinition> {
    let mut ordered = Vec::with_capacity(definitions.len());
    let mut seen = HashSet::new();
    for index in 0..definitions.len() {
        visit(definitions, index, &mut seen, &mut ordered);
    }
    ordered
}

fn visit<'a>(
    definitions: &'a [SchemaDefinition],
    index: usize,
    seen: &mut HashSet<usize>,
    ordered: &mut Vec<&'a SchemaDefinition>,
) {
    let definition = &definitions[index];
    if is_builtin(&definition.oid) || !seen.insert(index) {
        return;
    }
    for superior in &definition.superiors {
        match definitions.iter().position(|d| d.answers_to(superior)) {
            Some(sup) => visit(definitions, sup, seen, ordered),
            None => debug!(oid = %definition.oid, superior = %superior, "superior not in schema, assuming built in"),
        }
    }
    ordered.push(definition);
}

/// Wraps `line` at unquoted spaces so no line exceeds `width` where
/// possible. Continuation lines start with a tab.
pub fn wrap_line(line: &str, width: usize) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut current = 0;
    for (i, chunk) in split_unquoted(line).into_iter().enumerate() {
        if i == 0 {
            out.push_str(chunk);
            current = chunk.len();
        } else if current + 1 + chunk.len() > width {
            out.push_str("\n\t");
            out.push_str(chunk);
            current = 1 + chunk.len();
        } else {
            out.push(' ');
            out.push_str(chunk);
            current += 1 + chunk.len();
        }
    }
    out
}

fn split_unquoted(line: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut quoted = false;
    let mut start = None;
    for (i, c) in line.char_indices() {
        if c == '\'' {
            quoted = !quoted;
        }
        if c == ' ' && !quoted {
            if let Some(s) = start.take() {
                chunks.push(&line[s..i]);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        chunks.push(&line[s..]);
    }
    chunks
}

/// Parses every definition of `kind` from the subschema entry.
pub fn definitions(entry: &AttributeMap, kind: DefinitionKind) -> Vec<SchemaDefinition> {
    let Some(values) = entry.get(kind.attribute()) else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|value| {
            let text = String::from_utf8_lossy(value);
            let parsed = SchemaDefinition::parse(&text);
            if parsed.is_none() {
                warn!(kind = kind.attribute(), definition = %text, "skipping unparsable schema definition");
            }
            parsed
        })
        .collect()
}

/// Renders the schema file for the subschema entry.
pub fn render(entry: &AttributeMap, width: usize) -> String {
    let mut out = String::from(SCHEMA_HEADER);
    for kind in [DefinitionKind::AttributeType, DefinitionKind::ObjectClass] {
        let defs = definitions(entry, kind);
        for definition in order_definitions(&defs) {
            let line = format!("{} {}", kind.directive(), definition.text);
            out.push_str(&wrap_line(&line, width));
            out.push('\n');
        }
    }
    out
}

/// Counts of definitions written by one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaUpdate {
    /// Attribute types written.
    pub attribute_types: usize,
    /// Object classes written.
    pub object_classes: usize,
}

/// Rewrites the local schema file and reloads the server.
pub struct SchemaSynchronizer {
    schema_file: PathBuf,
    staging_file: PathBuf,
    line_width: usize,
    settle_delay: Duration,
    directory_service: Arc<dyn ServiceControl>,
}

impl SchemaSynchronizer {
    /// Creates a synchronizer writing the files named in `config`.
    pub fn new(config: &ReplicationConfig, directory_service: Arc<dyn ServiceControl>) -> Self {
        Self {
            schema_file: config.schema_file.clone(),
            staging_file: config.schema_staging_file.clone(),
            line_width: config.schema_line_width,
            settle_delay: config.server_settle_delay,
            directory_service,
        }
    }

    /// Active schema file.
    pub fn schema_file(&self) -> &PathBuf {
        &self.schema_file
    }

    /// Writes the schema carried by `entry` and restarts the server.
    pub fn update(&self, entry: &AttributeMap) -> ReplicationResult<SchemaUpdate> {
        let count = |kind| order_definitions(&definitions(entry, kind)).len();
        let update = SchemaUpdate {
            attribute_types: count(DefinitionKind::AttributeType),
            object_classes: count(DefinitionKind::ObjectClass),
        };
        let content = render(entry, self.line_width);
        files::write_staged(&self.staging_file, &self.schema_file, content.as_bytes())?;
        info!(
            path = %self.schema_file.display(),
            attribute_types = update.attribute_types,
            object_classes = update.object_classes,
            "schema replicated"
        );

        if let Err(e) = self.directory_service.restart() {
            warn!(error = %e, "failed to restart local directory server after schema update");
        }
        std::thread::sleep(self.settle_delay);
        Ok(update)
    }
}

impl std::fmt::Debug for SchemaSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSynchronizer")
            .field("schema_file", &self.schema_file)
            .field("staging_file", &self.staging_file)
            .field("line_width", &self.line_width)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{RecordingService, ServiceAction};
    use std::fs;
    use tempfile::TempDir;

    fn def(text: &str) -> SchemaDefinition {
        SchemaDefinition::parse(text).unwrap()
    }

    fn oids(ordered: &[&SchemaDefinition]) -> Vec<String> {
        ordered.iter().map(|d| d.oid.clone()).collect()
    }

    #[test]
    fn parses_names_and_superiors() {
        let d = def("( 1.2.3 NAME ( 'a' 'alias' ) DESC 'has SUP in it' SUP ( top $ person ) STRUCTURAL )");
        assert_eq!(d.oid, "1.2.3");
        assert_eq!(d.names, vec!["a", "alias"]);
        assert_eq!(d.superiors, vec!["top", "person"]);

        let d = def("(1.2.4 NAME 'b' SUP name)");
        assert_eq!(d.oid, "1.2.4");
        assert_eq!(d.names, vec!["b"]);
        assert_eq!(d.superiors, vec!["name"]);
        assert!(d.answers_to("B"));
        assert!(d.answers_to("1.2.4"));
    }

    #[test]
    fn quoted_text_is_kept_verbatim() {
        let d = def("(  1.2.5\n\tNAME 'c'   DESC 'two  spaces\tand a tab'  )");
        assert_eq!(d.text, "( 1.2.5 NAME 'c' DESC 'two  spaces\tand a tab' )");
    }

    #[test]
    fn rejects_definition_without_oid() {
        assert!(SchemaDefinition::parse("( )").is_none());
        assert!(SchemaDefinition::parse("").is_none());
    }

    #[test]
    fn superiors_come_first() {
        let defs = vec![
            def("( 1.1 NAME 'x' SUP y )"),
            def("( 1.2 NAME 'y' SUP 1.3 )"),
            def("( 1.3 NAME 'z' )"),
        ];
        assert_eq!(oids(&order_definitions(&defs)), vec!["1.3", "1.2", "1.1"]);
    }

    #[test]
    fn builtins_are_dropped() {
        let defs = vec![
            def("( 2.5.4.41 NAME 'name' )"),
            def("( 1.1 NAME 'local' SUP name )"),
        ];
        assert_eq!(oids(&order_definitions(&defs)), vec!["1.1"]);
    }

    #[test]
    fn cycles_and_unknown_superiors_emit_each_once() {
        let defs = vec![
            def("( 1.1 NAME 'a' SUP b )"),
            def("( 1.2 NAME 'b' SUP a )"),
            def("( 1.3 NAME 'c' SUP missing )"),
        ];
        let ordered = oids(&order_definitions(&defs));
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered, vec!["1.2", "1.1", "1.3"]);
    }

    #[test]
    fn wraps_long_lines_outside_quotes() {
        let line = "attributetype ( 1.2.3 NAME 'x' DESC 'a description with spaces' EQUALITY caseIgnoreMatch )";
        let wrapped = wrap_line(line, 30);
        for l in wrapped.lines().skip(1) {
            assert!(l.starts_with('\t'));
        }
        assert!(wrapped.contains("'a description with spaces'"));
        assert_eq!(wrapped.replace("\n\t", " "), line);
        assert_eq!(wrap_line("short", 78), "short");
    }

    #[test]
    fn update_writes_file_and_restarts() {
        let dir = TempDir::new().unwrap();
        let config = ReplicationConfig::new("dc=x")
            .with_root(dir.path())
            .with_server_settle_delay(Duration::ZERO);
        let service = Arc::new(RecordingService::new());
        let sync = SchemaSynchronizer::new(&config, service.clone());

        let mut entry = AttributeMap::new();
        entry.insert(
            "attributeTypes",
            vec![
                b"( 1.1 NAME 'child' SUP parent )".to_vec(),
                b"( 1.2 NAME 'parent' )".to_vec(),
                b"( 2.5.4.0 NAME 'objectClass' )".to_vec(),
            ],
        );
        entry.insert("objectClasses", vec![b"( 1.9 NAME 'thing' SUP top )".to_vec()]);

        let update = sync.update(&entry).unwrap();
        assert_eq!(
            update,
            SchemaUpdate {
                attribute_types: 2,
                object_classes: 1
            }
        );
        assert_eq!(service.count(ServiceAction::Restart), 1);
        assert!(!config.schema_staging_file.exists());

        let written = fs::read_to_string(&config.schema_file).unwrap();
        assert!(written.starts_with(SCHEMA_HEADER));
        let body: Vec<&str> = written.lines().skip(3).collect();
        assert_eq!(
            body,
            vec![
                "attributetype ( 1.2 NAME 'parent' )",
                "attributetype ( 1.1 NAME 'child' SUP parent )",
                "objectclass ( 1.9 NAME 'thing' SUP top )",
            ]
        );
    }

    #[test]
    fn schema_dn_is_case_insensitive() {
        assert!(is_schema_dn("cn=subschema"));
        assert!(is_schema_dn("CN=Subschema"));
        assert!(!is_schema_dn("cn=Subschema,dc=x"));
    }
}
