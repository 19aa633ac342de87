//! Fuzz target: `EntityPattern` parsing and matching.

#![no_main]

use libfuzzer_sys::fuzz_target;
use taf_core::{EntityId, EntityPattern};

fuzz_target!(|input: (&str, &str)| {
    let (pattern, candidate) = input;
    let Ok(pattern) = pattern.parse::<EntityPattern>() else {
        return;
    };
    let reparsed: EntityPattern = pattern.to_string().parse().expect("printed pattern must parse again");
    assert_eq!(reparsed, pattern);

    // Matching must never panic, whatever the candidate looks like.
    if let Ok(id) = candidate.parse::<EntityId>() {
        let _ = pattern.matches(&id);
    }
});
