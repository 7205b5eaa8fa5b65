//! Serialization of [`Message`] back into a wire line.

use std::fmt::Write as _;

use super::tags::{is_valid_tag_key, write_tags};
use super::{
    is_valid_command, Command, Message, FORBIDDEN_CHARACTERS, MESSAGE_LENGTH_LIMIT,
    TAGGED_MESSAGE_LENGTH_LIMIT,
};
use crate::error::{ProtocolError, Result};

/// A parameter that must be sent with a leading colon.
pub(crate) fn needs_colon_prefix(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

impl Message {
    /// Serialize into a `\r\n`-terminated line.
    ///
    /// Unless `force` is set this fails on a command outside
    /// `[A-Za-z]+|[0-9]+`, on a space-containing, empty or colon-prefixed
    /// parameter that is not last, on CR/LF/NUL anywhere in the line, on an
    /// unrepresentable tag key, and on lines longer than
    /// [`MESSAGE_LENGTH_LIMIT`] (or [`TAGGED_MESSAGE_LENGTH_LIMIT`] with tags).
    pub fn construct(&self, force: bool) -> Result<String> {
        if !force {
            self.check_grammar()?;
        }

        let mut core = String::with_capacity(64);
        self.write_core(&mut core);
        if !force {
            check_characters(&core)?;
            check_length(core.len() + 2, MESSAGE_LENGTH_LIMIT)?;
        }
        core.push_str("\r\n");

        if self.tags.is_empty() {
            return Ok(core);
        }

        let mut line = String::with_capacity(core.len() + 64);
        write_tags(&mut line, &self.tags);
        if !force {
            check_characters(&line)?;
        }
        line.push_str(&core);
        if !force {
            check_length(line.len(), TAGGED_MESSAGE_LENGTH_LIMIT)?;
        }
        Ok(line)
    }

    /// Unchecked serialization, terminator included.
    pub(crate) fn serialize(&self) -> String {
        let mut line = String::with_capacity(64);
        if !self.tags.is_empty() {
            write_tags(&mut line, &self.tags);
        }
        self.write_core(&mut line);
        line.push_str("\r\n");
        line
    }

    fn check_grammar(&self) -> Result<()> {
        match &self.command {
            Command::Named(name) if !is_valid_command(name) => {
                return Err(ProtocolError::InvalidCommand(name.clone()));
            }
            Command::Numeric(code) if *code > 999 => {
                return Err(ProtocolError::InvalidCommand(code.to_string()));
            }
            _ => {}
        }

        if let Some(source) = &self.source {
            if source.is_empty() || source.contains(' ') || source.starts_with(':') {
                return Err(ProtocolError::InvalidSource(source.clone()));
            }
        }

        let last = self.params.len().saturating_sub(1);
        if let Some((index, param)) = self
            .params
            .iter()
            .enumerate()
            .find(|(i, p)| *i != last && needs_colon_prefix(p))
        {
            return Err(ProtocolError::MisplacedTrailing {
                index,
                param: param.clone(),
            });
        }

        if let Some(key) = self.tags.keys().find(|k| !is_valid_tag_key(k)) {
            return Err(ProtocolError::InvalidTagKey(key.clone()));
        }
        Ok(())
    }

    fn write_core(&self, out: &mut String) {
        if let Some(source) = &self.source {
            out.push(':');
            out.push_str(source);
            out.push(' ');
        }
        match &self.command {
            Command::Named(name) => out.push_str(&name.to_ascii_uppercase()),
            Command::Numeric(code) => {
                let _ = write!(out, "{code:03}");
            }
        }
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            if i == last && needs_colon_prefix(param) {
                out.push(':');
            }
            out.push_str(param);
        }
    }
}

fn check_characters(part: &str) -> Result<()> {
    match part.chars().find(|c| FORBIDDEN_CHARACTERS.contains(c)) {
        Some(c) => Err(ProtocolError::IllegalControlChar(c)),
        None => Ok(()),
    }
}

fn check_length(len: usize, limit: usize) -> Result<()> {
    if len > limit {
        return Err(ProtocolError::MessageTooLong { len, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_trailing() {
        let msg = Message::new("PRIVMSG", ["#chan", "hello world"]);
        assert_eq!(msg.construct(false).unwrap(), "PRIVMSG #chan :hello world\r\n");

        let msg = Message::new("TOPIC", ["#chan", ""]);
        assert_eq!(msg.construct(false).unwrap(), "TOPIC #chan :\r\n");

        let msg = Message::new("PRIVMSG", ["#chan", ":)"]);
        assert_eq!(msg.construct(false).unwrap(), "PRIVMSG #chan ::)\r\n");
    }

    #[test]
    fn test_construct_source_and_numeric() {
        let msg = Message::new(1u16, ["nick", "Welcome"]).with_source("irc.example.net");
        assert_eq!(
            msg.construct(false).unwrap(),
            ":irc.example.net 001 nick Welcome\r\n"
        );
    }

    #[test]
    fn test_construct_lowercase_named_command() {
        let msg = Message {
            command: Command::Named("join".to_owned()),
            ..Message::new("JOIN", ["#a"])
        };
        assert_eq!(msg.construct(false).unwrap(), "JOIN #a\r\n");
    }

    #[test]
    fn test_construct_rejects_misplaced_trailing() {
        let msg = Message::new("PRIVMSG", ["#a b", "text"]);
        assert_eq!(
            msg.construct(false),
            Err(ProtocolError::MisplacedTrailing {
                index: 0,
                param: "#a b".to_owned()
            })
        );
        assert!(msg.construct(true).is_ok());
    }

    #[test]
    fn test_construct_rejects_bad_command() {
        let msg = Message::new("PRIV$MSG", ["x"]);
        assert!(matches!(
            msg.construct(false),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_construct_rejects_numeric_above_three_digits() {
        let msg = Message::new(1000u16, ["x"]);
        assert_eq!(
            msg.construct(false),
            Err(ProtocolError::InvalidCommand("1000".to_owned()))
        );
    }

    #[test]
    fn test_construct_rejects_bad_source() {
        for source in ["", "a b", ":irc.example.net"] {
            let msg = Message::new("PRIVMSG", ["#a", "hi"]).with_source(source);
            assert_eq!(
                msg.construct(false),
                Err(ProtocolError::InvalidSource(source.to_owned()))
            );
        }
        let forced = Message::new("PRIVMSG", ["#a", "hi"]).with_source("a b");
        assert_eq!(forced.construct(true).unwrap(), ":a b PRIVMSG #a hi\r\n");
    }

    #[test]
    fn test_construct_single_digit_command_round_trips() {
        let msg = Message::new("1", ["x"]);
        let line = msg.construct(false).unwrap();
        assert_eq!(line, "1 x\r\n");
        assert_eq!(crate::message::ParsedLine::parse_str(&line).message, msg);
    }

    #[test]
    fn test_construct_rejects_control_characters() {
        let msg = Message::new("PRIVMSG", ["#a", "evil\r\nQUIT"]);
        assert_eq!(
            msg.construct(false),
            Err(ProtocolError::IllegalControlChar('\r'))
        );
        let forced = msg.construct(true).unwrap();
        assert_eq!(forced, "PRIVMSG #a evil\r\nQUIT\r\n");
    }

    #[test]
    fn test_construct_length_ceiling() {
        // "PRIVMSG #a " is 11 bytes, plus CRLF.
        let fits = Message::new("PRIVMSG", ["#a", "x".repeat(499).as_str()]);
        assert_eq!(fits.construct(false).unwrap().len(), 512);

        let too_long = Message::new("PRIVMSG", ["#a", "x".repeat(500).as_str()]);
        assert_eq!(
            too_long.construct(false),
            Err(ProtocolError::MessageTooLong { len: 513, limit: 512 })
        );
        assert_eq!(too_long.construct(true).unwrap().len(), 513);
    }

    #[test]
    fn test_construct_tags_escaped() {
        let msg = Message::new("TAGMSG", ["#a"])
            .with_tag("+draft/react", Some("a;b c"))
            .with_tag("+typing", None);
        assert_eq!(
            msg.construct(false).unwrap(),
            "@+draft/react=a\\:b\\sc;+typing TAGMSG #a\r\n"
        );
    }

    #[test]
    fn test_construct_tagged_length_ceiling() {
        let core = "x".repeat(400);
        let msg = Message::new("PRIVMSG", ["#a", core.as_str()])
            .with_tag("k", Some("v".repeat(500).as_str()));
        assert!(msg.construct(false).is_ok());

        let msg = Message::new("PRIVMSG", ["#a", core.as_str()])
            .with_tag("k", Some("v".repeat(700).as_str()));
        assert!(matches!(
            msg.construct(false),
            Err(ProtocolError::MessageTooLong { limit: 1024, .. })
        ));
    }
}
