//! LDIF writer.

use crate::error::LdifResult;
use crate::record::{Change, Record};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Write;

/// Default column at which long lines are folded.
pub const DEFAULT_FOLD_WIDTH: usize = 76;

/// Serialize a single record to an LDIF string.
///
/// The output ends with the blank line that terminates a record.
pub fn to_ldif(record: &Record) -> String {
    let mut writer = LdifWriter::new(Vec::new());
    // Writing into a Vec cannot fail.
    let _ = writer.write_record(record);
    String::from_utf8_lossy(&writer.into_inner()).into_owned()
}

/// Returns true if `value` can be written verbatim after `attr: `.
///
/// Follows the SAFE-STRING production of RFC 2849: ASCII only, no NUL,
/// CR or LF, must not start with space, colon or `<`, and must not end
/// with a space.
pub fn is_safe_value(value: &[u8]) -> bool {
    let Some((&first, _)) = value.split_first() else {
        return true;
    };
    if matches!(first, b' ' | b':' | b'<') {
        return false;
    }
    if value.last() == Some(&b' ') {
        return false;
    }
    value
        .iter()
        .all(|&b| b.is_ascii() && !matches!(b, 0 | b'\n' | b'\r'))
}

/// Streams LDIF records to an underlying writer.
///
/// Every record is flushed after its terminating blank line so a crash
/// never leaves a half-written record behind a complete one.
pub struct LdifWriter<W: Write> {
    inner: W,
    fold_width: usize,
}

impl<W: Write> LdifWriter<W> {
    /// Creates a writer folding at [`DEFAULT_FOLD_WIDTH`].
    pub fn new(inner: W) -> Self {
        Self::with_fold_width(inner, DEFAULT_FOLD_WIDTH)
    }

    /// Creates a writer folding at `fold_width` columns.
    pub fn with_fold_width(inner: W, fold_width: usize) -> Self {
        Self {
            inner,
            fold_width: fold_width.max(2),
        }
    }

    /// Consumes the writer and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Returns a mutable reference to the underlying sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Writes a `# ...` comment line.
    pub fn write_comment(&mut self, comment: &str) -> LdifResult<()> {
        for line in comment.lines() {
            writeln!(self.inner, "# {}", line)?;
        }
        Ok(())
    }

    /// Writes one record followed by a blank line.
    pub fn write_record(&mut self, record: &Record) -> LdifResult<()> {
        self.write_attribute("dn", record.dn.as_bytes())?;
        self.write_attribute("changetype", record.change.keyword().as_bytes())?;

        match &record.change {
            Change::Add(attrs) => {
                for (attr, values) in attrs {
                    for value in values {
                        self.write_attribute(attr, value)?;
                    }
                }
            }
            Change::Modify(mods) => {
                for modification in mods {
                    self.write_attribute(modification.op.keyword(), modification.attr.as_bytes())?;
                    for value in &modification.values {
                        self.write_attribute(&modification.attr, value)?;
                    }
                    writeln!(self.inner, "-")?;
                }
            }
            Change::Delete => {}
            Change::ModRdn {
                new_rdn,
                delete_old_rdn,
                new_superior,
            } => {
                self.write_attribute("newrdn", new_rdn.as_bytes())?;
                let flag: &[u8] = if *delete_old_rdn { b"1" } else { b"0" };
                self.write_attribute("deleteoldrdn", flag)?;
                if let Some(superior) = new_superior {
                    self.write_attribute("newsuperior", superior.as_bytes())?;
                }
            }
        }

        writeln!(self.inner)?;
        self.inner.flush()?;
        Ok(())
    }

    fn write_attribute(&mut self, attr: &str, value: &[u8]) -> LdifResult<()> {
        let line = if is_safe_value(value) {
            // Safe values are pure ASCII.
            format!("{}: {}", attr, String::from_utf8_lossy(value))
        } else {
            format!("{}:: {}", attr, STANDARD.encode(value))
        };
        self.write_folded(&line)
    }

    fn write_folded(&mut self, line: &str) -> LdifResult<()> {
        let bytes = line.as_bytes();
        if bytes.len() <= self.fold_width {
            writeln!(self.inner, "{}", line)?;
            return Ok(());
        }

        let (head, mut rest) = bytes.split_at(self.fold_width);
        self.inner.write_all(head)?;
        self.inner.write_all(b"\n")?;
        let chunk = self.fold_width - 1;
        while !rest.is_empty() {
            let take = rest.len().min(chunk);
            let (part, tail) = rest.split_at(take);
            self.inner.write_all(b" ")?;
            self.inner.write_all(part)?;
            self.inner.write_all(b"\n")?;
            rest = tail;
        }
        Ok(())
    }
}
