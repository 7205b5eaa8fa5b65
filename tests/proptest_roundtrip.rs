//! Property-based tests for the wire codec and mode tables.
//!
//! Uses proptest to generate random IRC components and verify that:
//! 1. Parsing never panics, whatever the bytes
//! 2. Constructed messages parse back to the same message
//! 3. Mode application and case folding keep their invariants

use proptest::prelude::*;
use slirc_engine::message::TagValue;
use slirc_engine::mode::apply;
use slirc_engine::{BehaviorTable, CaseMapping, Message, ModeMap, ParsedLine};

// =============================================================================
// STRATEGIES - Generators for valid IRC components
// =============================================================================

/// Valid IRC nickname: starts with letter or special char, followed by
/// letters, digits, or special chars.
fn nickname_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z\\[\\]\\\\^_`{|}][a-zA-Z0-9\\-\\[\\]\\\\^_`{|}]{0,8}")
        .expect("valid regex")
}

fn username_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9]{0,9}").expect("valid regex")
}

fn hostname_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,10}(\\.[a-z0-9]{1,10}){0,3}").expect("valid regex")
}

/// `nick!user@host` or a server name.
fn source_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[a-z]{1,10}\\.[a-z]{1,10}\\.[a-z]{1,5}").expect("valid regex"),
        (nickname_strategy(), username_strategy(), hostname_strategy())
            .prop_map(|(nick, user, host)| format!("{nick}!{user}@{host}")),
    ]
}

fn command_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[A-Za-z]{1,12}").expect("valid regex"),
        prop::string::string_regex("[0-9]{3}").expect("valid regex"),
    ]
}

/// Middle parameter: no spaces, no leading colon.
fn middle_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9#&_\\-][a-zA-Z0-9#&_:\\-]{0,19}").expect("valid regex")
}

/// Printable ASCII, spaces and colons included.
fn trailing_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{0,300}").expect("valid regex")
}

fn tag_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("\\+?([a-z0-9.]{1,10}/)?[a-zA-Z][a-zA-Z0-9\\-]{0,30}")
        .expect("valid regex")
}

/// Values exercise every escape: `;`, space and backslash.
fn tag_value_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[ -~]{1,40}").expect("valid regex"))
}

/// Generate a complete valid Message
fn message_strategy() -> impl Strategy<Value = Message> {
    (
        prop::collection::vec((tag_key_strategy(), tag_value_strategy()), 0..3),
        prop::option::of(source_strategy()),
        command_strategy(),
        prop::collection::vec(middle_strategy(), 0..5),
        prop::option::of(trailing_strategy()),
    )
        .prop_map(|(tags, source, command, middle, trailing)| {
            let mut msg = Message::new(command.as_str(), middle.into_iter().chain(trailing));
            msg.source = source;
            for (key, value) in tags {
                msg = msg.with_tag(key, value.as_deref());
            }
            msg
        })
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// construct → parse = identity
    #[test]
    fn message_roundtrip(msg in message_strategy()) {
        let line = msg.construct(false).expect("generated message should be valid");
        let parsed = ParsedLine::parse(line.as_bytes());

        prop_assert!(parsed.valid, "line flagged invalid: {}", line);
        prop_assert_eq!(&msg, &parsed.message, "roundtrip failed for: {}", line);
        prop_assert_eq!(parsed.raw.as_str(), line.trim_end_matches("\r\n"));
    }

    /// Tag values survive escaping whatever punctuation they carry
    #[test]
    fn tag_value_roundtrip(key in tag_key_strategy(), value in tag_value_strategy()) {
        let msg = Message::new("TAGMSG", ["#chan"]).with_tag(key.clone(), value.as_deref());
        let line = msg.construct(false).unwrap();
        let parsed = ParsedLine::parse(line.as_bytes()).message;

        let expected = match value {
            Some(value) => TagValue::Value(value),
            None => TagValue::Flag,
        };
        prop_assert_eq!(parsed.tags.get(&key), Some(&expected));
    }

    /// Parsing is total: arbitrary bytes never panic
    #[test]
    fn parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..1200)) {
        let parsed = ParsedLine::parse(&bytes);
        if parsed.valid {
            prop_assert!(!parsed.message.command.to_string().is_empty());
        }
    }

    /// Source nickname extraction from a full prefix
    #[test]
    fn source_nickname_extraction(
        nick in nickname_strategy(),
        user in username_strategy(),
        host in hostname_strategy()
    ) {
        let msg = Message::new("PING", ["test"]).with_source(format!("{nick}!{user}@{host}"));
        prop_assert_eq!(msg.source_nickname(), Some(nick.as_str()));
    }
}

// =============================================================================
// MODES AND CASE MAPPING
// =============================================================================

proptest! {
    /// Setting flags then clearing them leaves the map as it was
    #[test]
    fn flags_set_then_cleared(flags in prop::string::string_regex("[psitnmr]{1,7}").expect("valid regex")) {
        let table = BehaviorTable::channel_defaults();
        let set = format!("+{flags}");
        let cleared = format!("-{flags}");

        let modes = apply(&[set.as_str()], &ModeMap::new(), &table).unwrap();
        prop_assert!(flags.chars().all(|c| modes.contains_key(&c)));
        let modes = apply(&[cleared.as_str()], &modes, &table).unwrap();
        prop_assert!(modes.is_empty());
    }

    /// List entries stay duplicate-free however often they are added
    #[test]
    fn list_entries_deduplicated(masks in prop::collection::vec("[a-c]\\*!\\*@\\*", 1..8)) {
        let table = BehaviorTable::channel_defaults();
        let mut modes = ModeMap::new();
        for mask in &masks {
            modes = apply(&["+b", mask.as_str()], &modes, &table).unwrap();
        }
        let slirc_engine::ModeValue::List(entries) = &modes[&'b'] else {
            return Err(TestCaseError::fail("+b should produce a list"));
        };
        let mut unique = masks.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(entries.len(), unique.len());
    }

    /// Folding is idempotent and agrees with equals
    #[test]
    fn casemap_fold_idempotent(name in "[ -~]{0,20}") {
        for mapping in [CaseMapping::Ascii, CaseMapping::Rfc1459, CaseMapping::StrictRfc1459] {
            let folded = mapping.fold(&name);
            prop_assert_eq!(mapping.fold(&folded), folded.clone());
            prop_assert!(mapping.equals(&name, &folded));
        }
    }
}
