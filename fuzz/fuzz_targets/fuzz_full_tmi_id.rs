//! Fuzz target: `FullTmiId` parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use taf_core::FullTmiId;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(id) = text.parse::<FullTmiId>() {
        let again: FullTmiId = id.to_string().parse().expect("printed id must parse again");
        assert_eq!(again, id);
    }
});
