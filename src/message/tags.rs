//! IRCv3 message tags and their value escaping.

use std::collections::BTreeMap;

/// Tags of a message, ordered by key so serialization is deterministic.
pub type Tags = BTreeMap<String, TagValue>;

/// Value of a single tag.
///
/// An empty value is sent as a bare key, so `Value("")` compares and hashes
/// equal to `Flag`.
#[derive(Clone, Debug)]
pub enum TagValue {
    /// Tag present without a value.
    Flag,
    /// Tag with an (unescaped) value.
    Value(String),
}

impl TagValue {
    /// The value, if the tag carries a non-empty one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Value(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for TagValue {}

impl std::hash::Hash for TagValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<Option<&str>> for TagValue {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(value) if !value.is_empty() => TagValue::Value(value.to_owned()),
            _ => TagValue::Flag,
        }
    }
}

/// Escape a tag value into `out`.
///
/// `;`, space, `\`, CR and LF become `\:`, `\s`, `\\`, `\r` and `\n`.
pub fn escape_tag_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

/// Reverse [`escape_tag_value`].
///
/// Any other escaped character stands for itself and a lone trailing
/// backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => unescaped.push(';'),
            Some('s') => unescaped.push(' '),
            Some('r') => unescaped.push('\r'),
            Some('n') => unescaped.push('\n'),
            Some(other) => unescaped.push(other),
            None => break,
        }
    }
    unescaped
}

/// Parse the tag section of a line (without the leading `@`).
pub(crate) fn parse_tags(section: &str) -> Tags {
    section
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !value.is_empty() => {
                (key.to_owned(), TagValue::Value(unescape_tag_value(value)))
            }
            Some((key, _)) => (key.to_owned(), TagValue::Flag),
            None => (entry.to_owned(), TagValue::Flag),
        })
        .collect()
}

/// Write `@k=v;k2 ` for a non-empty tag map.
pub(crate) fn write_tags(out: &mut String, tags: &Tags) {
    out.push('@');
    for (i, (key, value)) in tags.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        out.push_str(key);
        if let Some(value) = value.as_str() {
            out.push('=');
            escape_tag_value(out, value);
        }
    }
    out.push(' ');
}

/// Whether a key can be written without corrupting the tag section.
pub(crate) fn is_valid_tag_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| matches!(c, ' ' | ';' | '=' | '\r' | '\n' | '\0'))
}
