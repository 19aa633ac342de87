//! Trust graph snapshots handed to the fusion engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::EntityId;
use crate::opinion::SubjectiveOpinion;

/// How parallel opinions on one proposition are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum FusionOperator {
    CumulativeFusion,
    AveragingFusion,
}

impl FusionOperator {
    /// Fuses two opinions.
    ///
    /// # Errors
    /// Propagates [`CoreError::InvalidOpinion`] from the operator.
    pub fn fuse(self, a: &SubjectiveOpinion, b: &SubjectiveOpinion) -> Result<SubjectiveOpinion, CoreError> {
        match self {
            Self::CumulativeFusion => a.cumulative_fusion(b),
            Self::AveragingFusion => a.averaging_fusion(b),
        }
    }

    /// Folds any number of opinions; an empty input is vacuous.
    ///
    /// # Errors
    /// Propagates [`CoreError::InvalidOpinion`] from the operator.
    pub fn fuse_all<'a, I>(self, opinions: I) -> Result<SubjectiveOpinion, CoreError>
    where
        I: IntoIterator<Item = &'a SubjectiveOpinion>,
    {
        let mut iter = opinions.into_iter();
        let Some(first) = iter.next() else {
            return Ok(SubjectiveOpinion::FULL_UNCERTAINTY);
        };
        iter.try_fold(*first, |acc, next| self.fuse(&acc, next))
    }
}

/// How an opinion is propagated along a referral edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum DiscountOperator {
    OppositeBeliefDiscount,
    ProbabilitySensitiveDiscount,
}

impl DiscountOperator {
    /// Discounts `opinion` by the trust placed in its source.
    ///
    /// # Errors
    /// Propagates [`CoreError::InvalidOpinion`] from the operator.
    pub fn discount(
        self,
        trust: &SubjectiveOpinion,
        opinion: &SubjectiveOpinion,
    ) -> Result<SubjectiveOpinion, CoreError> {
        match self {
            Self::OppositeBeliefDiscount => trust.opposite_belief_discount(opinion),
            Self::ProbabilitySensitiveDiscount => trust.probability_sensitive_discount(opinion),
        }
    }
}

/// One node and the nodes it has outgoing trust edges to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjacencyEntry {
    pub source: EntityId,
    pub targets: Vec<EntityId>,
}

impl AdjacencyEntry {
    #[must_use]
    pub fn new(source: EntityId, targets: Vec<EntityId>) -> Self {
        Self { source, targets }
    }
}

/// Shape of a trust model instance at one version.
///
/// Rebuilt whenever the topology changes; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustGraphStructure {
    pub fusion_operator: FusionOperator,
    pub discount_operator: DiscountOperator,
    pub adjacency: Vec<AdjacencyEntry>,
}

impl TrustGraphStructure {
    #[must_use]
    pub fn new(
        fusion_operator: FusionOperator,
        discount_operator: DiscountOperator,
        adjacency: Vec<AdjacencyEntry>,
    ) -> Self {
        Self { fusion_operator, discount_operator, adjacency }
    }

    /// Outgoing edges of `node`, empty if the node has none.
    #[must_use]
    pub fn targets_of(&self, node: &EntityId) -> &[EntityId] {
        self.adjacency
            .iter()
            .find(|entry| &entry.source == node)
            .map_or(&[], |entry| entry.targets.as_slice())
    }

    /// A node that appears as a source but never as a target.
    #[must_use]
    pub fn root(&self) -> Option<&EntityId> {
        self.adjacency
            .iter()
            .map(|entry| &entry.source)
            .find(|source| !self.adjacency.iter().any(|e| e.targets.contains(source)))
    }
}

/// A directed trust edge carrying an opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRelationship {
    pub source: EntityId,
    pub destination: EntityId,
    pub opinion: SubjectiveOpinion,
}

impl TrustRelationship {
    #[must_use]
    pub fn new(source: EntityId, destination: EntityId, opinion: SubjectiveOpinion) -> Self {
        Self { source, destination, opinion }
    }
}

/// Relationships per proposition (scope) consumed by the fusion engine.
pub type TrustValues = BTreeMap<EntityId, Vec<TrustRelationship>>;
