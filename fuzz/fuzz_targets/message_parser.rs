//! Fuzz target for IRC message parsing
//!
//! Parsing is total, so any input must produce a message without panicking.
//! Lines the parser accepts as valid must also construct again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slirc_engine::ParsedLine;

fuzz_target!(|data: &[u8]| {
    let parsed = ParsedLine::parse(data);
    if parsed.valid {
        let _ = parsed.message.construct(true);
    }
});
