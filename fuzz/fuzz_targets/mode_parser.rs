//! Fuzz target for mode change application
//!
//! Splits the input into tokens and applies them to the default channel
//! table. Errors are fine; panics are not.

#![no_main]

use libfuzzer_sys::fuzz_target;
use slirc_engine::mode::apply;
use slirc_engine::{BehaviorTable, ModeMap};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let tokens: Vec<&str> = input.split(' ').collect();
    let _ = apply(&tokens, &ModeMap::new(), &BehaviorTable::channel_defaults());
});
