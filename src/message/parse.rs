//! Total parsing of received lines.

use std::borrow::Cow;

use encoding::{Encoding, UTF_8, WINDOWS_1252};
use nom::bytes::complete::{take_till, take_till1, take_while1};
use nom::character::complete::char;
use nom::combinator::opt;
use nom::sequence::{preceded, terminated};
use nom::IResult;

use super::tags::parse_tags;
use super::{
    is_valid_command, Command, Message, Tags, FORBIDDEN_CHARACTERS, MESSAGE_LENGTH_LIMIT,
    TAGGED_MESSAGE_LENGTH_LIMIT,
};

/// Text decoding for inbound bytes and encoding for outbound lines.
///
/// Decoding tries the primary encoding first and falls back to a single-byte
/// legacy encoding (windows-1252, the superset of ISO-8859-1) when the bytes
/// are malformed, so decoding never fails.
#[derive(Clone, Copy, Debug)]
pub struct Decoder {
    primary: &'static Encoding,
}

impl Decoder {
    /// Decoder for an encoding label such as `utf-8` or `latin1`.
    pub fn for_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.as_bytes()).map(|primary| Decoder { primary })
    }

    /// Decode one line.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let (text, malformed) = self.primary.decode_without_bom_handling(bytes);
        if !malformed {
            return text;
        }
        WINDOWS_1252.decode_without_bom_handling(bytes).0
    }

    /// Encode one outbound line.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        self.primary.encode(text).0
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder { primary: UTF_8 }
    }
}

/// A received line together with its parse bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLine {
    /// The structured message.
    pub message: Message,
    /// The decoded line, terminator stripped.
    pub raw: String,
    /// False when the line broke a length, character or grammar rule.
    pub valid: bool,
}

impl ParsedLine {
    /// Parse raw bytes using UTF-8 with the legacy fallback.
    pub fn parse(bytes: &[u8]) -> Self {
        Self::parse_with(&Decoder::default(), bytes)
    }

    /// Parse raw bytes with a specific decoder.
    pub fn parse_with(decoder: &Decoder, bytes: &[u8]) -> Self {
        Self::parse_str(&decoder.decode(bytes))
    }

    /// Parse an already decoded line. Never fails.
    pub fn parse_str(line: &str) -> Self {
        let line = line
            .strip_suffix("\r\n")
            .or_else(|| line.strip_suffix('\n'))
            .unwrap_or(line);
        let mut valid = !line.contains(&FORBIDDEN_CHARACTERS[..]);

        let (tags, rest) = match tag_section(line) {
            Ok((rest, section)) => {
                valid &= line.len() + 2 <= TAGGED_MESSAGE_LENGTH_LIMIT;
                (parse_tags(section), rest)
            }
            Err(_) => (Tags::new(), line),
        };
        let rest = rest.trim_start_matches(' ');
        valid &= rest.len() + 2 <= MESSAGE_LENGTH_LIMIT;

        let message = match head(rest) {
            Ok((raw_params, (source, command))) => {
                valid &= is_valid_command(command);
                Message {
                    tags,
                    source: source.map(str::to_owned),
                    command: Command::new(command),
                    params: split_params(raw_params.trim_start_matches(' ')),
                }
            }
            Err(_) => {
                valid = false;
                Message {
                    tags,
                    source: None,
                    command: Command::Named(String::new()),
                    params: Vec::new(),
                }
            }
        };

        ParsedLine {
            message,
            raw: line.to_owned(),
            valid,
        }
    }
}

fn is_space(c: char) -> bool {
    c == ' '
}

fn separator(input: &str) -> IResult<&str, &str> {
    take_while1(is_space)(input)
}

fn tag_section(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_till(is_space))(input)
}

/// `[':' source ' '+] command`
fn head(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    let (input, source) = opt(terminated(
        preceded(char(':'), take_till1(is_space)),
        separator,
    ))(input)?;
    let (input, command) = take_till1(is_space)(input)?;
    Ok((input, (source, command)))
}

fn split_params(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    if let Some(trailing) = raw.strip_prefix(':') {
        return vec![trailing.to_owned()];
    }
    let (middle, trailing) = match raw.find(" :") {
        Some(index) => (&raw[..index], Some(&raw[index + 2..])),
        None => (raw, None),
    };
    middle
        .split(' ')
        .filter(|word| !word.is_empty())
        .chain(trailing)
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TagValue;

    #[test]
    fn test_parse_basic() {
        let line = ParsedLine::parse(b":a!b@c PRIVMSG #chan :hello world\r\n");
        assert!(line.valid);
        assert_eq!(line.raw, ":a!b@c PRIVMSG #chan :hello world");
        assert_eq!(line.message.source.as_deref(), Some("a!b@c"));
        assert_eq!(line.message.command, Command::Named("PRIVMSG".to_owned()));
        assert_eq!(line.message.params, ["#chan", "hello world"]);
    }

    #[test]
    fn test_parse_tag_escaping() {
        let line = ParsedLine::parse(b"@a=1;b=x\\sy :s CMD p\r\n");
        assert!(line.valid);
        assert_eq!(line.message.tags.len(), 2);
        assert_eq!(line.message.tags["a"], TagValue::Value("1".to_owned()));
        assert_eq!(line.message.tags["b"], TagValue::Value("x y".to_owned()));
        assert_eq!(line.message.source.as_deref(), Some("s"));
        assert_eq!(line.message.params, ["p"]);
    }

    #[test]
    fn test_parse_bare_newline_and_case() {
        let line = ParsedLine::parse(b"ping :irc.example.net\n");
        assert!(line.valid);
        assert_eq!(line.message.command, Command::Named("PING".to_owned()));
        assert_eq!(line.message.params, ["irc.example.net"]);
    }

    #[test]
    fn test_parse_numeric() {
        let line = ParsedLine::parse(b":irc 001 nick :Welcome home\r\n");
        assert_eq!(line.message.command, Command::Numeric(1));
        assert_eq!(line.message.params, ["nick", "Welcome home"]);
    }

    #[test]
    fn test_parse_runs_of_spaces() {
        let line = ParsedLine::parse(b":src   MODE  #a   +o  nick\r\n");
        assert!(line.valid);
        assert_eq!(line.message.params, ["#a", "+o", "nick"]);

        let line = ParsedLine::parse(b"PRIVMSG #a  :two  spaces\r\n");
        assert_eq!(line.message.params, ["#a", "two  spaces"]);
    }

    #[test]
    fn test_parse_no_params() {
        let line = ParsedLine::parse(b"QUIT\r\n");
        assert!(line.valid);
        assert!(line.message.params.is_empty());
    }

    #[test]
    fn test_parse_empty_trailing() {
        let line = ParsedLine::parse(b"TOPIC #a :\r\n");
        assert_eq!(line.message.params, ["#a", ""]);
    }

    #[test]
    fn test_parse_latin1_fallback() {
        let line = ParsedLine::parse(b"PRIVMSG #a :caf\xe9\r\n");
        assert!(line.valid);
        assert_eq!(line.message.params[1], "caf\u{e9}");
    }

    #[test]
    fn test_parse_invalid_command_is_flagged() {
        let line = ParsedLine::parse(b"PRIV$MSG #a :x\r\n");
        assert!(!line.valid);
        assert_eq!(line.message.params, ["#a", "x"]);
    }

    #[test]
    fn test_parse_empty_line() {
        let line = ParsedLine::parse(b"\r\n");
        assert!(!line.valid);
        assert!(line.raw.is_empty());

        let line = ParsedLine::parse(b":source-only\r\n");
        assert!(!line.valid);
    }

    #[test]
    fn test_parse_embedded_nul() {
        let line = ParsedLine::parse(b"PRIVMSG #a :bad\0byte\r\n");
        assert!(!line.valid);
        assert_eq!(line.message.params[1], "bad\0byte");
    }

    #[test]
    fn test_parse_over_length_is_flagged() {
        let long = format!("PRIVMSG #a :{}\r\n", "x".repeat(600));
        let line = ParsedLine::parse(long.as_bytes());
        assert!(!line.valid);
        assert_eq!(line.message.params[1].len(), 600);

        let tagged = format!("@k={} PRIVMSG #a :hi\r\n", "v".repeat(600));
        assert!(ParsedLine::parse(tagged.as_bytes()).valid);

        let tagged = format!("@k={} PRIVMSG #a :hi\r\n", "v".repeat(1100));
        assert!(!ParsedLine::parse(tagged.as_bytes()).valid);
    }

    #[test]
    fn test_decoder_label() {
        let decoder = Decoder::for_label("latin1").unwrap();
        assert_eq!(decoder.decode(b"\xe9"), "\u{e9}");
        assert!(Decoder::for_label("no-such-encoding").is_none());
    }
}
