//! Benchmarks for IRC message parsing, construction and mode application.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use slirc_engine::mode::apply;
use slirc_engine::{BehaviorTable, Message, ModeMap, ParsedLine};

/// Simple PING message
const SIMPLE_MESSAGE: &str = "PING :irc.example.com\r\n";

/// Message with source
const SOURCE_MESSAGE: &str = ":nick!user@host PRIVMSG #channel :Hello, world!\r\n";

/// Message with IRCv3 tags
const TAGGED_MESSAGE: &str = "@time=2023-01-01T00:00:00.000Z;msgid=abc123;+example/tag=value :nick!user@host PRIVMSG #channel :Hello with tags!\r\n";

/// Escaped tag values
const ESCAPED_TAGS: &str = "@time=2023-01-01T12:00:00Z;msgid=msg-12345;+draft/reply=a\\sb\\:c;batch=batch001;account=username :nick!user@host.example.com PRIVMSG #long-channel-name :This is a longer message with more content to parse\r\n";

/// Numeric response
const NUMERIC_RESPONSE: &str = ":irc.server.net 001 nickname :Welcome to the IRC Network nickname!user@host\r\n";

/// Legacy-encoded line that fails UTF-8 decoding
const LATIN1_MESSAGE: &[u8] = b":nick!user@host PRIVMSG #caf\xe9 :d\xe9j\xe0 vu\r\n";

const LINES: [(&str, &str); 5] = [
    ("simple_ping", SIMPLE_MESSAGE),
    ("with_source", SOURCE_MESSAGE),
    ("with_tags", TAGGED_MESSAGE),
    ("escaped_tags", ESCAPED_TAGS),
    ("numeric_response", NUMERIC_RESPONSE),
];

fn benchmark_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Message Parsing");

    for (name, line) in LINES {
        group.bench_function(name, |b| {
            b.iter(|| black_box(ParsedLine::parse(black_box(line.as_bytes()))))
        });
    }

    group.bench_function("latin1_fallback", |b| {
        b.iter(|| black_box(ParsedLine::parse(black_box(LATIN1_MESSAGE))))
    });

    group.finish();
}

fn benchmark_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("Message Construction");

    let parsed: Vec<_> = LINES
        .iter()
        .map(|(name, line)| (*name, ParsedLine::parse(line.as_bytes()).message))
        .collect();
    for (name, msg) in &parsed {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(black_box(msg).construct(false).unwrap()))
        });
    }

    group.bench_function("privmsg_with_tags", |b| {
        b.iter(|| {
            let msg = Message::new("PRIVMSG", [black_box("#channel"), black_box("Hello!")])
                .with_source("nick!user@host")
                .with_tag("time", Some("2023-01-01T12:00:00Z"))
                .with_tag("msgid", Some("abc123"));
            black_box(msg.construct(false).unwrap())
        })
    });

    group.finish();
}

fn benchmark_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("Round Trip");

    for (name, line) in LINES {
        group.bench_with_input(BenchmarkId::new("parse_construct", name), line, |b, s| {
            b.iter(|| {
                let parsed = ParsedLine::parse(black_box(s.as_bytes()));
                black_box(parsed.message.construct(false).unwrap())
            })
        });
    }

    group.finish();
}

fn benchmark_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Mode Application");
    let table = BehaviorTable::channel_defaults();
    let current = apply(&["+ntb", "*!*@spam"], &ModeMap::new(), &table).unwrap();

    group.bench_function("flags_and_params", |b| {
        b.iter(|| {
            black_box(apply(
                black_box(&["+ntlk-b+ov", "25", "secret", "*!*@spam", "alice", "bob"]),
                &current,
                &table,
            ))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_parsing,
    benchmark_construction,
    benchmark_round_trip,
    benchmark_modes,
);

criterion_main!(benches);
