//! Trust level evaluation over a trust graph snapshot.
//!
//! A [`FusionEngine`] turns an instance's structure and values into one
//! actual trust level per proposition. The engine calls it only after an
//! update changed the instance's version.

use std::collections::BTreeMap;
use std::fmt;

use taf_core::{EntityId, SubjectiveOpinion, TmiId, TrustGraphStructure, TrustRelationship, TrustValues};

use crate::error::FusionError;

/// Actual trust level per proposition.
pub type Atls = BTreeMap<EntityId, SubjectiveOpinion>;

pub trait FusionEngine: Send + Sync + fmt::Debug {
    /// Evaluates one snapshot. Must be a pure function of its inputs.
    ///
    /// # Errors
    /// Returns [`FusionError`] if the graph cannot be evaluated.
    fn run(
        &self,
        id: &TmiId,
        version: u64,
        fingerprint: u32,
        structure: &TrustGraphStructure,
        values: &TrustValues,
    ) -> Result<Atls, FusionError>;
}

/// Path-based fusion for small graphs.
///
/// For every proposition, each simple path from the root to the
/// proposition is discounted edge by edge, then the paths are fused with
/// the structure's fusion operator. Propositions no path reaches are left
/// out of the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalFusion;

type Edges<'a> = BTreeMap<&'a EntityId, BTreeMap<&'a EntityId, SubjectiveOpinion>>;

fn edges(relationships: &[TrustRelationship]) -> Edges<'_> {
    let mut edges = Edges::new();
    for relationship in relationships {
        edges.entry(&relationship.source).or_default().insert(&relationship.destination, relationship.opinion);
    }
    edges
}

struct PathSearch<'a> {
    structure: &'a TrustGraphStructure,
    edges: Edges<'a>,
    target: &'a EntityId,
    visited: Vec<&'a EntityId>,
    current: Vec<SubjectiveOpinion>,
    found: Vec<Vec<SubjectiveOpinion>>,
}

impl<'a> PathSearch<'a> {
    fn walk(&mut self, from: &'a EntityId) {
        let structure = self.structure;
        self.visited.push(from);
        for next in structure.targets_of(from) {
            if self.visited.contains(&next) {
                continue;
            }
            let Some(opinion) = self.edges.get(from).and_then(|out| out.get(next)).copied() else {
                continue;
            };
            self.current.push(opinion);
            if next == self.target {
                self.found.push(self.current.clone());
            } else {
                self.walk(next);
            }
            self.current.pop();
        }
        self.visited.pop();
    }
}

impl FusionEngine for InternalFusion {
    fn run(
        &self,
        id: &TmiId,
        version: u64,
        fingerprint: u32,
        structure: &TrustGraphStructure,
        values: &TrustValues,
    ) -> Result<Atls, FusionError> {
        if values.is_empty() {
            return Ok(Atls::new());
        }
        let root = structure.root().ok_or_else(|| FusionError::MissingRoot { tmi: id.clone() })?;
        let operator_error = |e: taf_core::CoreError| FusionError::Operator { tmi: id.clone(), reason: e.to_string() };

        let mut atls = Atls::new();
        for (scope, relationships) in values {
            let mut search = PathSearch {
                structure,
                edges: edges(relationships),
                target: scope,
                visited: Vec::new(),
                current: Vec::new(),
                found: Vec::new(),
            };
            search.walk(root);
            if search.found.is_empty() {
                tracing::debug!(tmi = %id, version, fingerprint, %scope, "no trust path to proposition");
                continue;
            }
            let mut discounted = Vec::with_capacity(search.found.len());
            for path in &search.found {
                let Some((first, rest)) = path.split_first() else {
                    continue;
                };
                let opinion = rest.iter().try_fold(*first, |trust, next| {
                    structure.discount_operator.discount(&trust, next).map_err(operator_error)
                })?;
                discounted.push(opinion);
            }
            let fused = structure.fusion_operator.fuse_all(&discounted).map_err(operator_error)?;
            atls.insert(scope.clone(), fused);
        }
        Ok(atls)
    }
}

#[cfg(test)]
mod tests {
    use taf_core::{AdjacencyEntry, DiscountOperator, FusionOperator};

    use super::*;

    fn id(raw: &str) -> EntityId {
        match raw.parse() {
            Ok(id) => id,
            Err(e) => panic!("invalid id {raw}: {e}"),
        }
    }

    fn opinion(b: f64, d: f64, u: f64) -> SubjectiveOpinion {
        match SubjectiveOpinion::new(b, d, u, 0.5) {
            Ok(o) => o,
            Err(e) => panic!("invalid opinion: {e}"),
        }
    }

    fn run(structure: &TrustGraphStructure, values: &TrustValues) -> Result<Atls, FusionError> {
        InternalFusion.run(&TmiId::new("t"), 1, 0, structure, values)
    }

    fn structure(adjacency: Vec<AdjacencyEntry>) -> TrustGraphStructure {
        TrustGraphStructure::new(FusionOperator::CumulativeFusion, DiscountOperator::OppositeBeliefDiscount, adjacency)
    }

    #[test]
    fn direct_edge_is_returned_unchanged() {
        let graph = structure(vec![AdjacencyEntry::new(id("TAF"), vec![id("VC1")])]);
        let trust = opinion(0.6, 0.1, 0.3);
        let values = TrustValues::from([(id("VC1"), vec![TrustRelationship::new(id("TAF"), id("VC1"), trust)])]);
        let atls = match run(&graph, &values) {
            Ok(a) => a,
            Err(e) => panic!("fusion failed: {e}"),
        };
        assert!(atls.get(&id("VC1")).is_some_and(|o| o.approx_eq(&trust)));
    }

    #[test]
    fn referral_path_is_discounted_and_fused_with_direct_path() {
        let graph = structure(vec![
            AdjacencyEntry::new(id("V_ego"), vec![id("C_5_19"), id("V_5")]),
            AdjacencyEntry::new(id("V_5"), vec![id("C_5_19")]),
        ]);
        let direct = opinion(0.5, 0.0, 0.5);
        let referral = opinion(0.5, 0.0, 0.5);
        let values = TrustValues::from([(
            id("C_5_19"),
            vec![
                TrustRelationship::new(id("V_5"), id("C_5_19"), SubjectiveOpinion::FULL_BELIEF),
                TrustRelationship::new(id("V_ego"), id("C_5_19"), direct),
                TrustRelationship::new(id("V_ego"), id("V_5"), referral),
            ],
        )]);
        let atls = match run(&graph, &values) {
            Ok(a) => a,
            Err(e) => panic!("fusion failed: {e}"),
        };
        let Some(fused) = atls.get(&id("C_5_19")) else {
            panic!("proposition missing from result");
        };
        let discounted = match DiscountOperator::OppositeBeliefDiscount.discount(&referral, &SubjectiveOpinion::FULL_BELIEF) {
            Ok(o) => o,
            Err(e) => panic!("discount failed: {e}"),
        };
        let expected = match direct.cumulative_fusion(&discounted) {
            Ok(o) => o,
            Err(e) => panic!("fusion failed: {e}"),
        };
        assert!(fused.approx_eq(&expected), "got {fused}, expected {expected}");
        assert!(fused.belief() > direct.belief(), "a corroborating path must add belief");
    }

    #[test]
    fn proposition_without_path_is_left_out() {
        let graph = structure(vec![AdjacencyEntry::new(id("TAF"), vec![id("VC1")])]);
        let values = TrustValues::from([(
            id("VC2"),
            vec![TrustRelationship::new(id("TAF"), id("VC2"), SubjectiveOpinion::FULL_BELIEF)],
        )]);
        assert!(matches!(run(&graph, &values), Ok(atls) if atls.is_empty()));
    }

    #[test]
    fn graph_without_root_is_an_error() {
        let graph = structure(vec![
            AdjacencyEntry::new(id("A"), vec![id("B")]),
            AdjacencyEntry::new(id("B"), vec![id("A")]),
        ]);
        let values =
            TrustValues::from([(id("B"), vec![TrustRelationship::new(id("A"), id("B"), SubjectiveOpinion::FULL_BELIEF)])]);
        assert!(matches!(run(&graph, &values), Err(FusionError::MissingRoot { .. })));
    }

    #[test]
    fn empty_values_need_no_structure() {
        assert!(matches!(run(&structure(vec![]), &TrustValues::new()), Ok(atls) if atls.is_empty()));
    }
}
