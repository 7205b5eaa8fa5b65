//! IRC case mappings.
//!
//! Servers announce how nicknames and channel names compare through the
//! `CASEMAPPING` ISUPPORT token. Besides ASCII folding, `rfc1459` treats
//! `[]\~` as the upper-case forms of `{}|^`; `strict-rfc1459` leaves `~` and
//! `^` distinct.

/// A server case mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CaseMapping {
    /// Plain ASCII folding.
    Ascii,
    /// ASCII plus `[]\~` → `{}|^`.
    #[default]
    Rfc1459,
    /// ASCII plus `[]\` → `{}|`.
    StrictRfc1459,
}

impl CaseMapping {
    /// Mapping for a `CASEMAPPING` value. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => Some(CaseMapping::Ascii),
            "rfc1459" => Some(CaseMapping::Rfc1459),
            "strict-rfc1459" => Some(CaseMapping::StrictRfc1459),
            _ => None,
        }
    }

    /// Fold a single character.
    pub fn fold_char(self, c: char) -> char {
        match (self, c) {
            (_, 'A'..='Z') => c.to_ascii_lowercase(),
            (CaseMapping::Ascii, _) => c,
            (_, '[') => '{',
            (_, ']') => '}',
            (_, '\\') => '|',
            (CaseMapping::Rfc1459, '~') => '^',
            _ => c,
        }
    }

    /// Fold a whole name.
    pub fn fold(self, s: &str) -> String {
        s.chars().map(|c| self.fold_char(c)).collect()
    }

    /// Case-insensitive comparison under this mapping.
    pub fn equals(self, a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a
                .chars()
                .zip(b.chars())
                .all(|(ca, cb)| self.fold_char(ca) == self.fold_char(cb))
    }
}

/// Lower-case using the RFC 1459 mapping.
pub fn irc_to_lower(s: &str) -> String {
    CaseMapping::Rfc1459.fold(s)
}
