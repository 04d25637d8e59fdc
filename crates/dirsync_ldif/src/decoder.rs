//! LDIF reader.

use crate::error::{LdifError, LdifResult};
use crate::record::{Attributes, Change, ModOp, Modification, Record};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::BufRead;

/// Parse every record in `input`.
///
/// # Errors
///
/// Returns the first syntax or decoding error encountered.
pub fn from_ldif(input: &str) -> LdifResult<Vec<Record>> {
    LdifReader::new(input.as_bytes()).collect()
}

/// One logical (unfolded) line of a record.
#[derive(Debug)]
enum Line {
    Pair {
        number: usize,
        attr: String,
        value: Vec<u8>,
    },
    Separator {
        number: usize,
    },
}

/// Reads LDIF records one at a time from a buffered reader.
///
/// Content records (no `changetype`) are returned as add records.
pub struct LdifReader<R: BufRead> {
    inner: R,
    line_number: usize,
    peeked: Option<String>,
    done: bool,
}

impl<R: BufRead> LdifReader<R> {
    /// Creates a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line_number: 0,
            peeked: None,
            done: false,
        }
    }

    /// Reads the next record, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or malformed input.
    pub fn next_record(&mut self) -> LdifResult<Option<Record>> {
        let mut lines = Vec::new();
        while let Some((number, logical)) = self.next_logical_line()? {
            if logical.is_empty() {
                if lines.is_empty() {
                    continue;
                }
                break;
            }
            if logical.starts_with('#') {
                continue;
            }
            if logical == "-" {
                lines.push(Line::Separator { number });
                continue;
            }
            let (attr, value) = parse_pair(number, &logical)?;
            if lines.is_empty() && attr.eq_ignore_ascii_case("version") {
                continue;
            }
            lines.push(Line::Pair {
                number,
                attr,
                value,
            });
        }

        if lines.is_empty() {
            return Ok(None);
        }
        build_record(lines).map(Some)
    }

    fn read_physical_line(&mut self) -> LdifResult<Option<String>> {
        if let Some(line) = self.peeked.take() {
            return Ok(Some(line));
        }
        if self.done {
            return Ok(None);
        }
        let mut buf = String::new();
        if self.inner.read_line(&mut buf)? == 0 {
            self.done = true;
            return Ok(None);
        }
        self.line_number += 1;
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    fn next_logical_line(&mut self) -> LdifResult<Option<(usize, String)>> {
        let Some(mut logical) = self.read_physical_line()? else {
            return Ok(None);
        };
        let number = self.line_number;
        if logical.is_empty() {
            return Ok(Some((number, logical)));
        }
        loop {
            match self.read_physical_line()? {
                Some(next) if next.starts_with(' ') => logical.push_str(&next[1..]),
                Some(next) => {
                    self.peeked = Some(next);
                    break;
                }
                None => break,
            }
        }
        Ok(Some((number, logical)))
    }
}

impl<R: BufRead> Iterator for LdifReader<R> {
    type Item = LdifResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                self.peeked = None;
                Some(Err(err))
            }
        }
    }
}

fn parse_pair(number: usize, line: &str) -> LdifResult<(String, Vec<u8>)> {
    let Some((attr, rest)) = line.split_once(':') else {
        return Err(LdifError::syntax(number, "missing ':' separator"));
    };
    if attr.is_empty() {
        return Err(LdifError::syntax(number, "empty attribute name"));
    }
    let value = if let Some(encoded) = rest.strip_prefix(':') {
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| LdifError::InvalidBase64 { line: number })?
    } else if rest.starts_with('<') {
        return Err(LdifError::syntax(number, "URL values are not supported"));
    } else {
        rest.trim_start_matches(' ').as_bytes().to_vec()
    };
    Ok((attr.to_string(), value))
}

fn text(number: usize, value: Vec<u8>) -> LdifResult<String> {
    String::from_utf8(value).map_err(|_| LdifError::syntax(number, "value is not valid UTF-8"))
}

fn build_record(lines: Vec<Line>) -> LdifResult<Record> {
    let mut lines = lines.into_iter().peekable();
    let dn = match lines.next() {
        Some(Line::Pair {
            number,
            attr,
            value,
        }) if attr.eq_ignore_ascii_case("dn") => text(number, value)?,
        Some(Line::Pair { number, .. }) | Some(Line::Separator { number }) => {
            return Err(LdifError::syntax(number, "record must start with dn"));
        }
        None => return Err(LdifError::syntax(0, "empty record")),
    };

    let has_change_type = matches!(
        lines.peek(),
        Some(Line::Pair { attr, .. }) if attr.eq_ignore_ascii_case("changetype")
    );
    let change_type = match has_change_type.then(|| lines.next()).flatten() {
        Some(Line::Pair { number, value, .. }) => Some(text(number, value)?),
        _ => None,
    };

    let change = match change_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("add") => Change::Add(collect_attributes(lines)?),
        Some("delete") => Change::Delete,
        Some("modify") => Change::Modify(collect_modifications(&dn, lines)?),
        Some("modrdn") | Some("moddn") => collect_modrdn(&dn, lines)?,
        Some(other) => return Err(LdifError::UnsupportedChangeType(other.to_string())),
    };

    Ok(Record { dn, change })
}

fn collect_attributes(lines: impl Iterator<Item = Line>) -> LdifResult<Attributes> {
    let mut attrs: Attributes = Vec::new();
    for line in lines {
        match line {
            Line::Pair { attr, value, .. } => {
                match attrs.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(&attr)) {
                    Some((_, values)) => values.push(value),
                    None => attrs.push((attr, vec![value])),
                }
            }
            Line::Separator { number } => {
                return Err(LdifError::syntax(number, "unexpected '-' in add record"));
            }
        }
    }
    Ok(attrs)
}

fn collect_modifications(
    dn: &str,
    lines: impl Iterator<Item = Line>,
) -> LdifResult<Vec<Modification>> {
    let mut mods = Vec::new();
    let mut current: Option<Modification> = None;

    for line in lines {
        match line {
            Line::Separator { number } => match current.take() {
                Some(modification) => mods.push(modification),
                None => return Err(LdifError::syntax(number, "'-' without modification")),
            },
            Line::Pair {
                number,
                attr,
                value,
            } => match current.as_mut() {
                None => {
                    let op = ModOp::from_keyword(&attr).ok_or_else(|| {
                        LdifError::syntax(number, format!("unknown modify operation '{}'", attr))
                    })?;
                    current = Some(Modification::new(op, text(number, value)?, Vec::new()));
                }
                Some(modification) => {
                    if !modification.attr.eq_ignore_ascii_case(&attr) {
                        return Err(LdifError::syntax(
                            number,
                            format!("value for '{}' inside '{}' section", attr, modification.attr),
                        ));
                    }
                    modification.values.push(value);
                }
            },
        }
    }

    if let Some(modification) = current {
        return Err(LdifError::incomplete(
            dn,
            format!("modification of '{}' not terminated by '-'", modification.attr),
        ));
    }
    Ok(mods)
}

fn collect_modrdn(dn: &str, lines: impl Iterator<Item = Line>) -> LdifResult<Change> {
    let mut new_rdn = None;
    let mut delete_old_rdn = None;
    let mut new_superior = None;

    for line in lines {
        let Line::Pair {
            number,
            attr,
            value,
        } = line
        else {
            continue;
        };
        match attr.to_ascii_lowercase().as_str() {
            "newrdn" => new_rdn = Some(text(number, value)?),
            "deleteoldrdn" => delete_old_rdn = Some(value.as_slice() == b"1"),
            "newsuperior" => new_superior = Some(text(number, value)?),
            _ => {
                return Err(LdifError::syntax(
                    number,
                    format!("unexpected '{}' in modrdn record", attr),
                ))
            }
        }
    }

    Ok(Change::ModRdn {
        new_rdn: new_rdn.ok_or_else(|| LdifError::incomplete(dn, "missing newrdn"))?,
        delete_old_rdn: delete_old_rdn
            .ok_or_else(|| LdifError::incomplete(dn, "missing deleteoldrdn"))?,
        new_superior,
    })
}
