//! Fuzz target: `EntityId` parsing.
//!
//! Whatever parses must print back to the same text and survive a JSON
//! round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use taf_core::EntityId;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(id) = text.parse::<EntityId>() else {
        return;
    };
    assert_eq!(id.to_string(), text, "EntityId Display must reproduce the parsed text");

    let json = serde_json::to_string(&id).expect("EntityId serialization must not fail");
    let back: EntityId = serde_json::from_str(&json).expect("EntityId deserialization must not fail");
    assert_eq!(back, id);
});
