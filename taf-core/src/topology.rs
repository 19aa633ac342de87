//! Dynamic node sets of vehicle-triggered models.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::fingerprint::topology_fingerprint;
use crate::opinion::SubjectiveOpinion;

/// What happens to nodes that vanish from an observed object set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopologyPolicy {
    /// Stale nodes stay until superseded.
    #[default]
    Retain,
    /// Nodes missing from the latest observation are removed.
    Prune,
}

impl FromStr for TopologyPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETAIN" => Ok(Self::Retain),
            "PRUNE" => Ok(Self::Prune),
            other => Err(CoreError::InvalidParameter {
                key: "TOPOLOGY_POLICY".to_owned(),
                reason: format!("'{other}' is neither RETAIN nor PRUNE"),
            }),
        }
    }
}

/// Observed objects with the opinion held about each.
///
/// The fingerprint starts at `0` and is recomputed whenever the node set
/// changes.
#[derive(Debug, Clone)]
pub struct DynamicTopology {
    nodes: BTreeMap<String, SubjectiveOpinion>,
    pinned: BTreeSet<String>,
    policy: TopologyPolicy,
    fingerprint: u32,
}

impl DynamicTopology {
    #[must_use]
    pub fn new(policy: TopologyPolicy) -> Self {
        Self { nodes: BTreeMap::new(), pinned: BTreeSet::new(), policy, fingerprint: 0 }
    }

    /// Adds a node that pruning never removes, without touching the fingerprint.
    pub fn pin(&mut self, node: impl Into<String>) {
        let node = node.into();
        self.nodes.entry(node.clone()).or_insert(SubjectiveOpinion::FULL_UNCERTAINTY);
        self.pinned.insert(node);
    }

    /// Reconciles the node set with the latest observation.
    ///
    /// New nodes start fully uncertain. Returns `true` if the set changed.
    pub fn refresh<S: AsRef<str>>(&mut self, observed: &[S]) -> bool {
        let mut changed = false;
        for object in observed {
            let object = object.as_ref();
            if !self.nodes.contains_key(object) {
                self.nodes.insert(object.to_owned(), SubjectiveOpinion::FULL_UNCERTAINTY);
                changed = true;
            }
        }

        if self.policy == TopologyPolicy::Prune {
            let seen: BTreeSet<&str> = observed.iter().map(AsRef::as_ref).collect();
            let before = self.nodes.len();
            let pinned = &self.pinned;
            self.nodes.retain(|node, _| pinned.contains(node) || seen.contains(node.as_str()));
            changed |= self.nodes.len() != before;
        }

        if changed {
            self.fingerprint = topology_fingerprint(self.nodes.keys());
        }
        changed
    }

    /// Replaces the opinion on a tracked node; untracked nodes are ignored.
    pub fn set_opinion(&mut self, node: &str, opinion: SubjectiveOpinion) -> bool {
        match self.nodes.get_mut(node) {
            Some(slot) => {
                *slot = opinion;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn opinion(&self, node: &str) -> Option<&SubjectiveOpinion> {
        self.nodes.get(node)
    }

    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SubjectiveOpinion)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    #[must_use]
    pub fn policy(&self) -> TopologyPolicy {
        self.policy
    }
}
