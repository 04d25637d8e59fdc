//! Distinguished name helpers.
//!
//! Only the pieces the engine needs: splitting off the leftmost RDN,
//! reading its attribute/value pairs, measuring depth and comparing
//! DNs. Escapes (`\,`, `\+`, `\XX`) are respected when splitting.

/// Splits `dn` into its leftmost RDN and the parent DN.
///
/// The parent is empty for a single-component DN.
pub fn split_rdn(dn: &str) -> (&str, &str) {
    match find_unescaped(dn, b',') {
        Some(pos) => (dn[..pos].trim(), dn[pos + 1..].trim()),
        None => (dn.trim(), ""),
    }
}

/// Returns the leftmost RDN of `dn`.
pub fn rdn(dn: &str) -> &str {
    split_rdn(dn).0
}

/// Returns the parent DN of `dn`, empty for a single component.
pub fn parent(dn: &str) -> &str {
    split_rdn(dn).1
}

/// Returns the number of RDN components in `dn`.
pub fn depth(dn: &str) -> usize {
    if dn.trim().is_empty() {
        return 0;
    }
    let mut count = 1;
    let mut rest = dn;
    while let Some(pos) = find_unescaped(rest, b',') {
        count += 1;
        rest = &rest[pos + 1..];
    }
    count
}

/// Returns the `(attribute, value)` pairs of a (possibly multi-valued) RDN.
///
/// Values are unescaped.
pub fn rdn_pairs(rdn: &str) -> Vec<(String, Vec<u8>)> {
    let mut pairs = Vec::new();
    let mut rest = rdn;
    loop {
        let (component, tail) = match find_unescaped(rest, b'+') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };
        if let Some((attr, value)) = component.split_once('=') {
            pairs.push((attr.trim().to_string(), unescape(value.trim())));
        }
        match tail {
            Some(tail) => rest = tail,
            None => break,
        }
    }
    pairs
}

/// Normalizes a DN for comparison: lowercase, no blanks around separators.
pub fn normalize(dn: &str) -> String {
    let mut parts = Vec::new();
    let mut rest = dn;
    loop {
        match find_unescaped(rest, b',') {
            Some(pos) => {
                parts.push(normalize_rdn(&rest[..pos]));
                rest = &rest[pos + 1..];
            }
            None => {
                parts.push(normalize_rdn(rest));
                break;
            }
        }
    }
    parts.join(",")
}

/// Returns true if both DNs name the same entry.
pub fn same(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Returns true if `dn` equals `ancestor` or lies below it.
pub fn is_within(dn: &str, ancestor: &str) -> bool {
    let dn = normalize(dn);
    let ancestor = normalize(ancestor);
    dn == ancestor || dn.ends_with(&format!(",{}", ancestor))
}

fn normalize_rdn(rdn: &str) -> String {
    match rdn.split_once('=') {
        Some((attr, value)) => format!(
            "{}={}",
            attr.trim().to_ascii_lowercase(),
            value.trim().to_lowercase()
        ),
        None => rdn.trim().to_lowercase(),
    }
}

fn find_unescaped(s: &str, needle: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == needle => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn unescape(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes.get(i + 1..i + 3).and_then(|h| {
                std::str::from_utf8(h)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
            });
            match hex {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}
