//! Fuzz target: the binary-vector misbehavior quantifier.
//!
//! Any accepted weight set and any bitmask must yield a valid opinion.

#![no_main]

use libfuzzer_sys::fuzz_target;
use taf_core::{
    DetectorWeights, EvidenceMap, EvidenceType, EvidenceValue, MisbehaviorVector, Quantify, PRECISION,
};

fuzz_target!(|input: ([f64; 8], [f64; 8], u8)| {
    let (no_detection, detection, mask) = input;
    let Ok(model) = MisbehaviorVector::new(DetectorWeights { no_detection, detection }) else {
        return;
    };
    let evidence = EvidenceMap::from([(EvidenceType::MisbehaviorReport, EvidenceValue::Bitmask(mask))]);
    let opinion = model.quantify(&evidence);

    let sum = opinion.belief() + opinion.disbelief() + opinion.uncertainty();
    assert!((sum - 1.0).abs() <= PRECISION * 10.0, "components must sum to one, got {sum}");
    for component in [opinion.belief(), opinion.disbelief(), opinion.uncertainty()] {
        assert!((0.0..=1.0).contains(&component), "component {component} out of range");
    }
});
