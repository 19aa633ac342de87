//! Updates consumed by trust model instances.

use std::fmt;

use crate::evidence::TrustSource;
use crate::id::EntityId;
use crate::opinion::SubjectiveOpinion;

/// A single state change offered to a TMI.
///
/// Each update is applied by exactly one instance, once.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the opinion `trustor` holds about `trustee`.
    AtomicTrustOpinion {
        opinion: SubjectiveOpinion,
        source: TrustSource,
        trustor: EntityId,
        trustee: EntityId,
    },
    /// Objects currently perceived by vehicle `source`.
    RefreshCpm { source: String, objects: Vec<String> },
    NoOp,
}

impl Update {
    #[must_use]
    pub fn atomic(opinion: SubjectiveOpinion, source: TrustSource, trustor: EntityId, trustee: EntityId) -> Self {
        Self::AtomicTrustOpinion { opinion, source, trustor, trustee }
    }

    pub fn refresh_cpm(source: impl Into<String>, objects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::RefreshCpm { source: source.into(), objects: objects.into_iter().map(Into::into).collect() }
    }

    /// Short tag for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AtomicTrustOpinion { .. } => "ATO",
            Self::RefreshCpm { .. } => "REFRESH_CPM",
            Self::NoOp => "NO_OP",
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtomicTrustOpinion { opinion, source, trustor, trustee } => {
                write!(f, "ATO[{source}] {trustor} -> {trustee} = {opinion}")
            }
            Self::RefreshCpm { source, objects } => {
                write!(f, "REFRESH_CPM from {source}: {}", objects.join(","))
            }
            Self::NoOp => f.write_str("NO_OP"),
        }
    }
}
