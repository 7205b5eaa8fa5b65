//! Integration tests for message parsing and serialization
//!
//! Lines are parsed, constructed again and re-parsed; the structured
//! message must survive unchanged.

use slirc_engine::message::{Decoder, TagValue};
use slirc_engine::{Command, Message, ParsedLine, ProtocolError};

fn round_trip(original: &str) -> Message {
    let parsed = ParsedLine::parse_str(original);
    assert!(parsed.valid, "expected a valid line: {original}");
    let serialized = parsed
        .message
        .construct(false)
        .expect("Failed to construct message");
    let reparsed = ParsedLine::parse(serialized.as_bytes());
    assert!(reparsed.valid);
    assert_eq!(parsed.message, reparsed.message);
    reparsed.message
}

#[test]
fn test_message_round_trip_simple() {
    let message = round_trip("PING :irc.example.com");
    assert_eq!(message.command, Command::new("PING"));
    assert_eq!(message.params, ["irc.example.com"]);
}

#[test]
fn test_message_round_trip_with_source() {
    let message = round_trip(":nick!user@host PRIVMSG #channel :Hello, world!");
    assert_eq!(message.source.as_deref(), Some("nick!user@host"));
    assert_eq!(message.source_nickname(), Some("nick"));
    assert_eq!(message.params, ["#channel", "Hello, world!"]);
}

#[test]
fn test_message_round_trip_with_tags() {
    let message = round_trip(
        "@time=2023-01-01T00:00:00.000Z;msgid=abc123 :nick!user@host PRIVMSG #channel :Tagged message",
    );
    assert_eq!(
        message.tags.get("msgid"),
        Some(&TagValue::Value("abc123".to_owned()))
    );
    assert!(message.server_time().is_some());
}

#[test]
fn test_message_round_trip_numeric_response() {
    let message = round_trip(":server 001 nickname :Welcome to the IRC Network");
    assert_eq!(message.command, Command::Numeric(1));
    assert_eq!(message.command.to_string(), "001");
}

#[test]
fn test_message_round_trip_escaped_tag_values() {
    let message = round_trip(r"@+draft/reply=a\sb\:c\\d;flag :nick TAGMSG #channel");
    assert_eq!(
        message.tags.get("+draft/reply"),
        Some(&TagValue::Value("a b;c\\d".to_owned()))
    );
    assert_eq!(message.tags.get("flag"), Some(&TagValue::Flag));
}

#[test]
fn test_message_construction_and_parsing() {
    let message = Message::new("PRIVMSG", ["#test", "Integration test message"])
        .with_source("testbot!test@example.com")
        .with_tag("time", Some("2023-01-01T00:00:00Z"))
        .with_tag("msgid", Some("test123"));

    let line = message.construct(false).unwrap();
    assert_eq!(
        line,
        "@msgid=test123;time=2023-01-01T00:00:00Z :testbot!test@example.com PRIVMSG #test :Integration test message\r\n"
    );
    assert_eq!(ParsedLine::parse(line.as_bytes()).message, message);
}

#[test]
fn test_empty_and_colon_trailing() {
    round_trip("PRIVMSG #channel :");
    let message = round_trip("PRIVMSG #channel ::-)");
    assert_eq!(message.trailing(), Some(":-)"));
}

#[test]
fn test_lenient_whitespace() {
    let parsed = ParsedLine::parse_str(":nick   PRIVMSG   #chan   :hi  there\r\n");
    assert_eq!(parsed.message.params, ["#chan", "hi  there"]);
    assert_eq!(parsed.raw, ":nick   PRIVMSG   #chan   :hi  there");
}

#[test]
fn test_invalid_lines_still_parse() {
    let long = format!("PRIVMSG #chan :{}", "x".repeat(600));
    let parsed = ParsedLine::parse_str(&long);
    assert!(!parsed.valid);
    assert_eq!(parsed.message.command, Command::new("PRIVMSG"));

    let parsed = ParsedLine::parse_str("PRIV-MSG #chan :x");
    assert!(!parsed.valid);

    let parsed = ParsedLine::parse_str("");
    assert!(!parsed.valid);
    assert!(parsed.message.params.is_empty());
}

#[test]
fn test_construct_rejects_bad_messages() {
    assert!(matches!(
        Message::new("PRIVMSG", ["#a b", "x"]).construct(false),
        Err(ProtocolError::MisplacedTrailing { index: 0, .. })
    ));
    assert!(matches!(
        Message::new("PRIVMSG", ["#a", "line\nbreak"]).construct(false),
        Err(ProtocolError::IllegalControlChar('\n'))
    ));
    assert!(matches!(
        Message::new("PRIVMSG", ["#a".to_owned(), "x".repeat(600)]).construct(false),
        Err(ProtocolError::MessageTooLong { limit: 512, .. })
    ));
    assert!(Message::new("PRIVMSG", ["#a b", "x"]).construct(true).is_ok());
}

#[test]
fn test_legacy_encoding_fallback() {
    let parsed = ParsedLine::parse(b":nick PRIVMSG #chan :caf\xe9\r\n");
    assert_eq!(parsed.message.trailing(), Some("café"));

    let latin1 = Decoder::for_label("latin1").unwrap();
    assert_eq!(&*latin1.encode("café"), b"caf\xe9");
}

#[test]
fn test_empty_tag_value_round_trips() {
    let mut message = Message::new("TAGMSG", ["#channel"]);
    message
        .tags
        .insert("+draft/typing".to_owned(), TagValue::Value(String::new()));
    let line = message.construct(false).unwrap();
    assert_eq!(line, "@+draft/typing TAGMSG #channel\r\n");
    assert_eq!(ParsedLine::parse(line.as_bytes()).message, message);
}
