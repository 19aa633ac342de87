//! Snapshots of actual trust levels per TMI version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::{decide, TrustDecision};
use crate::id::{EntityId, FullTmiId};
use crate::model::Rtls;
use crate::opinion::SubjectiveOpinion;

/// What a client subscription reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyTrigger {
    ActualTrustworthinessLevel,
    TrustDecision,
}

/// One proposition's row in a result set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropositionOutcome<'a> {
    pub proposition: &'a EntityId,
    pub opinion: &'a SubjectiveOpinion,
    pub projected_probability: f64,
    pub decision: Option<bool>,
    pub trust_decision: Option<TrustDecision>,
}

/// Immutable per-version result: opinions, projected probabilities and
/// decisions, each keyed by proposition.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlResultSet {
    tmi: FullTmiId,
    version: u64,
    opinions: BTreeMap<EntityId, SubjectiveOpinion>,
    projected_probabilities: BTreeMap<EntityId, f64>,
    decisions: BTreeMap<EntityId, bool>,
    computed_at: DateTime<Utc>,
}

impl AtlResultSet {
    /// Builds a result set from fusion output and the instance's RTLs.
    ///
    /// Propositions without an RTL get no decision.
    #[must_use]
    pub fn evaluate(tmi: FullTmiId, version: u64, atls: BTreeMap<EntityId, SubjectiveOpinion>, rtls: &Rtls) -> Self {
        let projected_probabilities =
            atls.iter().map(|(id, atl)| (id.clone(), atl.projected_probability())).collect();
        let decisions = atls
            .iter()
            .filter_map(|(id, atl)| rtls.get(id).map(|rtl| (id.clone(), decide(atl, rtl))))
            .collect();
        Self { tmi, version, opinions: atls, projected_probabilities, decisions, computed_at: Utc::now() }
    }

    #[must_use]
    pub fn tmi(&self) -> &FullTmiId {
        &self.tmi
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    #[must_use]
    pub fn opinion(&self, proposition: &EntityId) -> Option<&SubjectiveOpinion> {
        self.opinions.get(proposition)
    }

    #[must_use]
    pub fn decision(&self, proposition: &EntityId) -> Option<bool> {
        self.decisions.get(proposition).copied()
    }

    /// Tri-state decision; `None` if the proposition has no RTL.
    #[must_use]
    pub fn trust_decision(&self, proposition: &EntityId) -> Option<TrustDecision> {
        let decided = self.decision(proposition)?;
        let atl = self.opinion(proposition)?;
        Some(match (atl.is_vacuous(), decided) {
            (true, _) => TrustDecision::Undecidable,
            (false, true) => TrustDecision::Trustworthy,
            (false, false) => TrustDecision::NotTrustworthy,
        })
    }

    pub fn propositions(&self) -> impl Iterator<Item = PropositionOutcome<'_>> {
        self.opinions.iter().map(|(proposition, opinion)| PropositionOutcome {
            proposition,
            opinion,
            projected_probability: self.projected_probabilities.get(proposition).copied().unwrap_or_default(),
            decision: self.decision(proposition),
            trust_decision: self.trust_decision(proposition),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.opinions.is_empty()
    }

    /// Whether a subscriber with `trigger` must be told about `self`
    /// given it last saw `previous`.
    #[must_use]
    pub fn changed_since(&self, previous: Option<&Self>, trigger: NotifyTrigger) -> bool {
        let Some(previous) = previous else {
            return !self.is_empty();
        };
        if self.opinions.len() != previous.opinions.len()
            || self.opinions.keys().any(|id| !previous.opinions.contains_key(id))
        {
            return true;
        }
        match trigger {
            NotifyTrigger::ActualTrustworthinessLevel => self
                .opinions
                .iter()
                .any(|(id, opinion)| previous.opinions.get(id).is_none_or(|old| !old.approx_eq(opinion))),
            NotifyTrigger::TrustDecision => self.decisions != previous.decisions,
        }
    }
}
