//! Comparison of actual against required trust levels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::opinion::SubjectiveOpinion;

/// `true` iff the projected probability of `atl` strictly exceeds that of `rtl`.
///
/// Ties are not trustworthy.
#[must_use]
pub fn decide(atl: &SubjectiveOpinion, rtl: &SubjectiveOpinion) -> bool {
    atl.projected_probability() > rtl.projected_probability()
}

/// Reporting form of a trust decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustDecision {
    Trustworthy,
    NotTrustworthy,
    /// The actual trust level carries no evidence.
    Undecidable,
}

impl TrustDecision {
    #[must_use]
    pub fn evaluate(atl: &SubjectiveOpinion, rtl: &SubjectiveOpinion) -> Self {
        if atl.is_vacuous() {
            Self::Undecidable
        } else if decide(atl, rtl) {
            Self::Trustworthy
        } else {
            Self::NotTrustworthy
        }
    }

    /// Boolean form for wire formats; `None` when undecidable.
    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Trustworthy => Some(true),
            Self::NotTrustworthy => Some(false),
            Self::Undecidable => None,
        }
    }
}

impl fmt::Display for TrustDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Trustworthy => "trustworthy",
            Self::NotTrustworthy => "not trustworthy",
            Self::Undecidable => "undecidable",
        };
        f.write_str(text)
    }
}
