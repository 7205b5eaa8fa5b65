//! IRC wire messages.
//!
//! A [`Message`] is the structured form of one protocol line:
//!
//! ```text
//! ['@' tags ' '] [':' source ' '] command [' ' middle]* [' ' ':' trailing] CRLF
//! ```
//!
//! # Parsing
//!
//! Parsing is total. [`ParsedLine::parse`] always produces a message and
//! reports length or character violations through [`ParsedLine::valid`], so
//! the read loop never has to bail out on a bad line.
//!
//! # Construction
//!
//! [`Message::construct`] is the checked inverse. It refuses to serialize a
//! line that breaks the grammar unless `force` is set.
//!
//! ```
//! use slirc_engine::message::{Message, ParsedLine};
//!
//! let msg = Message::new("PRIVMSG", ["#chan", "hello world"]);
//! let line = msg.construct(false).unwrap();
//! assert_eq!(line, "PRIVMSG #chan :hello world\r\n");
//!
//! let parsed = ParsedLine::parse(line.as_bytes());
//! assert!(parsed.valid);
//! assert_eq!(parsed.message, msg);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

mod construct;
mod parse;
mod tags;

pub use self::parse::{Decoder, ParsedLine};
pub use self::tags::{escape_tag_value, unescape_tag_value, TagValue, Tags};

/// Maximum length of an untagged line, terminator included.
pub const MESSAGE_LENGTH_LIMIT: usize = 512;

/// Maximum length of a line carrying message tags, terminator included.
pub const TAGGED_MESSAGE_LENGTH_LIMIT: usize = 1024;

/// Characters that may never appear inside a line.
pub const FORBIDDEN_CHARACTERS: [char; 3] = ['\r', '\n', '\0'];

/// A message command: either a word or a numeric reply code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    /// Alphabetic command, stored upper-cased.
    Named(String),
    /// Three-digit numeric reply.
    Numeric(u16),
}

impl Command {
    /// Interpret a raw command token.
    ///
    /// Three-digit tokens become [`Command::Numeric`]; anything else is
    /// upper-cased into [`Command::Named`], so other digit runs keep their
    /// spelling.
    pub fn new(token: &str) -> Self {
        if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = token.parse() {
                return Command::Numeric(code);
            }
        }
        Command::Named(token.to_ascii_uppercase())
    }

    /// Numeric code, if this is a numeric reply.
    pub fn numeric(&self) -> Option<u16> {
        match self {
            Command::Numeric(code) => Some(*code),
            Command::Named(_) => None,
        }
    }

    /// Case-insensitive comparison against a command word.
    pub fn is(&self, name: &str) -> bool {
        match self {
            Command::Named(own) => own.eq_ignore_ascii_case(name),
            Command::Numeric(_) => false,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Named(name) => f.write_str(name),
            Command::Numeric(code) => write!(f, "{code:03}"),
        }
    }
}

impl From<&str> for Command {
    fn from(token: &str) -> Self {
        Command::new(token)
    }
}

impl From<u16> for Command {
    fn from(code: u16) -> Self {
        Command::Numeric(code)
    }
}

/// Whether a command token matches `[A-Za-z]+|[0-9]+`.
pub fn is_valid_command(token: &str) -> bool {
    !token.is_empty()
        && (token.bytes().all(|b| b.is_ascii_alphabetic())
            || token.bytes().all(|b| b.is_ascii_digit()))
}

/// A structured IRC message.
///
/// Equality covers tags, source, command and parameters. The raw line and
/// validity flag of a received message live on [`ParsedLine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags.
    pub tags: Tags,
    /// Origin of the message (`nick!user@host` or a server name).
    pub source: Option<String>,
    /// The command or numeric.
    pub command: Command,
    /// Parameters, the last of which may be trailing.
    pub params: Vec<String>,
}

impl Message {
    /// Build a message from a command and its parameters.
    pub fn new<C, I, P>(command: C, params: I) -> Self
    where
        C: Into<Command>,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Message {
            tags: Tags::new(),
            source: None,
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a tag. An absent or empty value is stored as a flag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.tags.insert(key.into(), TagValue::from(value));
        self
    }

    /// Parameter at `index`.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The last parameter, if any.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Nickname part of a `nick!user@host` source.
    pub fn source_nickname(&self) -> Option<&str> {
        let source = self.source.as_deref()?;
        Some(source.split_once('!').map_or(source, |(nick, _)| nick))
    }

    /// Timestamp from the `server-time` tag.
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        let value = self.tags.get("time")?.as_str()?;
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }
}

impl fmt::Display for Message {
    /// Writes the line without its terminator, skipping validation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.serialize();
        f.write_str(line.trim_end_matches("\r\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_new() {
        assert_eq!(Command::new("privmsg"), Command::Named("PRIVMSG".to_owned()));
        assert_eq!(Command::new("001"), Command::Numeric(1));
        assert_eq!(Command::new("433"), Command::Numeric(433));
        assert_eq!(Command::Numeric(5).to_string(), "005");
        assert_eq!(Command::new("1"), Command::Named("1".to_owned()));
        assert_eq!(Command::new("1").to_string(), "1");
        assert_eq!(Command::new("0433").to_string(), "0433");
    }

    #[test]
    fn test_command_pattern() {
        assert!(is_valid_command("PRIVMSG"));
        assert!(is_valid_command("001"));
        assert!(!is_valid_command("PRIV1"));
        assert!(!is_valid_command(""));
        assert!(!is_valid_command("PRIV$MSG"));
    }

    #[test]
    fn test_source_nickname() {
        let msg = Message::new("PRIVMSG", ["#a", "b"]).with_source("nick!user@host");
        assert_eq!(msg.source_nickname(), Some("nick"));

        let msg = Message::new("NOTICE", ["*", "hi"]).with_source("irc.example.net");
        assert_eq!(msg.source_nickname(), Some("irc.example.net"));
    }

    #[test]
    fn test_server_time() {
        let msg = Message::new("PRIVMSG", ["#a", "b"])
            .with_tag("time", Some("2023-01-01T12:00:00.000Z"));
        let time = msg.server_time().unwrap();
        assert_eq!(time.to_rfc3339(), "2023-01-01T12:00:00+00:00");
    }

    #[test]
    fn test_display_skips_terminator() {
        let msg = Message::new("PING", ["irc.example.net"]);
        assert_eq!(msg.to_string(), "PING irc.example.net");
    }
}
