//! Exponentially weighted smoothing of successive opinions.

use taf_core::SubjectiveOpinion;

/// Blends `observed` into `previous` with weight `alpha`.
///
/// Belief and disbelief are averaged, uncertainty takes the remaining mass
/// and the base rate follows the observation. `alpha = 1` returns
/// `observed`.
#[must_use]
pub fn smooth(previous: &SubjectiveOpinion, observed: &SubjectiveOpinion, alpha: f64) -> SubjectiveOpinion {
    let belief = (1.0 - alpha) * previous.belief() + alpha * observed.belief();
    let disbelief = (1.0 - alpha) * previous.disbelief() + alpha * observed.disbelief();
    SubjectiveOpinion::from_belief_disbelief(belief, disbelief, observed.base_rate()).unwrap_or(*observed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(b: f64, d: f64, u: f64) -> SubjectiveOpinion {
        match SubjectiveOpinion::new(b, d, u, 0.5) {
            Ok(o) => o,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn alpha_one_replaces() {
        let observed = op(0.1, 0.7, 0.2);
        assert!(smooth(&op(0.9, 0.0, 0.1), &observed, 1.0).approx_eq(&observed));
    }

    #[test]
    fn half_alpha_averages() {
        let smoothed = smooth(&op(0.8, 0.0, 0.2), &op(0.0, 0.8, 0.2), 0.5);
        assert!(smoothed.approx_eq(&op(0.4, 0.4, 0.2)));
    }

    proptest::proptest! {
        #[test]
        fn smoothing_keeps_opinions_valid(
            b1 in 0.0..=1.0f64, s1 in 0.0..=1.0f64,
            b2 in 0.0..=1.0f64, s2 in 0.0..=1.0f64,
            alpha in 0.01..=1.0f64,
        ) {
            let previous = match SubjectiveOpinion::from_belief_disbelief(b1, (1.0 - b1) * s1, 0.5) {
                Ok(o) => o,
                Err(e) => panic!("generator produced invalid opinion: {e}"),
            };
            let observed = match SubjectiveOpinion::from_belief_disbelief(b2, (1.0 - b2) * s2, 0.5) {
                Ok(o) => o,
                Err(e) => panic!("generator produced invalid opinion: {e}"),
            };
            let o = smooth(&previous, &observed, alpha);
            let sum = o.belief() + o.disbelief() + o.uncertainty();
            proptest::prop_assert!((sum - 1.0).abs() < 1e-12);
            proptest::prop_assert!(o.uncertainty() >= 0.0);
        }
    }
}
