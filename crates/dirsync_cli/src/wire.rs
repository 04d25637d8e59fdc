//! JSON-lines notification format read by `dirsync run`.
//!
//! One notification per line:
//!
//! ```text
//! {"dn":"cn=ann,dc=example,dc=org","new":{"cn":["ann"],"jpegPhoto":[{"base64":"/9j/"}]},"old":null,"command":"a"}
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dirsync_engine::{AttributeMap, ChangeNotification, OperationTag};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors reading a notification line.
#[derive(Debug, Error)]
pub enum WireError {
    /// The line is not valid JSON of the expected shape.
    #[error("malformed notification: {0}")]
    Json(#[from] serde_json::Error),

    /// A `base64` value does not decode.
    #[error("invalid base64 in attribute {attr}: {source}")]
    Base64 {
        /// Attribute holding the value.
        attr: String,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// The command letter is unknown.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// Neither a new nor an old entry was supplied.
    #[error("notification for {0} carries no entry")]
    Empty(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireNotification {
    dn: String,
    #[serde(default)]
    new: Option<BTreeMap<String, Vec<WireValue>>>,
    #[serde(default)]
    old: Option<BTreeMap<String, Vec<WireValue>>>,
    #[serde(default = "default_command")]
    command: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Text(String),
    Binary { base64: String },
}

fn default_command() -> String {
    "n".to_string()
}

/// Parses one line into a notification.
pub fn parse_line(line: &str) -> Result<ChangeNotification, WireError> {
    let wire: WireNotification = serde_json::from_str(line)?;
    let tag = OperationTag::parse(&wire.command).ok_or_else(|| WireError::UnknownCommand(wire.command.clone()))?;
    let new = wire.new.map(to_attributes).transpose()?;
    let old = wire.old.map(to_attributes).transpose()?;
    let change = ChangeNotification::new(wire.dn, new, old, tag);
    if change.new.is_none() && change.old.is_none() {
        return Err(WireError::Empty(change.dn));
    }
    Ok(change)
}

fn to_attributes(wire: BTreeMap<String, Vec<WireValue>>) -> Result<AttributeMap, WireError> {
    let mut attrs = AttributeMap::new();
    for (name, values) in wire {
        let values = values
            .into_iter()
            .map(|value| match value {
                WireValue::Text(text) => Ok(text.into_bytes()),
                WireValue::Binary { base64 } => STANDARD.decode(base64).map_err(|source| WireError::Base64 {
                    attr: name.clone(),
                    source,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        attrs.insert(name, values);
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_binary_values() {
        let change = parse_line(
            r#"{"dn":"cn=ann,dc=x","new":{"cn":["ann"],"photo":[{"base64":"AAEC"}]},"command":"a"}"#,
        )
        .unwrap();
        assert_eq!(change.dn, "cn=ann,dc=x");
        assert_eq!(change.tag, OperationTag::Add);
        let new = change.new.unwrap();
        assert_eq!(new.first_str("cn"), Some("ann"));
        assert_eq!(new.get("photo").unwrap(), &[vec![0u8, 1, 2]][..]);
        assert!(change.old.is_none());
    }

    #[test]
    fn rename_hint_carries_old_only() {
        let change = parse_line(r#"{"dn":"cn=bob,dc=x","old":{"cn":["bob"]},"new":null,"command":"r"}"#).unwrap();
        assert_eq!(change.tag, OperationTag::RenameHint);
        assert!(change.new.is_none());
        assert!(change.old.is_some());
    }

    #[test]
    fn command_defaults_to_modify() {
        let change = parse_line(r#"{"dn":"cn=a,dc=x","new":{"cn":["a"]}}"#).unwrap();
        assert_eq!(change.tag, OperationTag::Modify);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse_line("{"), Err(WireError::Json(_))));
        assert!(matches!(
            parse_line(r#"{"dn":"cn=a","new":{"cn":["a"]},"command":"x"}"#),
            Err(WireError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_line(r#"{"dn":"cn=a","new":{"p":[{"base64":"!!"}]}}"#),
            Err(WireError::Base64 { .. })
        ));
        assert!(matches!(parse_line(r#"{"dn":"cn=a"}"#), Err(WireError::Empty(_))));
    }
}
