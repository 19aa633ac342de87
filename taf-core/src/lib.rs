//! Core types for the trust assessment framework.
//!
//! Subjective-logic opinions, trust graph snapshots, the update protocol
//! consumed by trust model instances, evidence quantifiers, trust decisions
//! and the completion barrier used to sequence asynchronous session setup.
//! Nothing in this crate performs I/O or depends on an async runtime.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod completion;
pub mod decision;
pub mod error;
pub mod evidence;
pub mod fingerprint;
pub mod id;
pub mod model;
pub mod opinion;
pub mod quantifier;
pub mod registry;
pub mod results;
pub mod structure;
pub mod topology;
pub mod update;

pub use completion::{CompletionHandler, CompletionParty};
pub use decision::{decide, TrustDecision};
pub use error::CoreError;
pub use evidence::{
    Appraisal, EvidenceMap, EvidenceType, EvidenceValue, MisbehaviorDetector, SecurityControl, TrustSource,
};
pub use fingerprint::{fnv1a_32, topology_fingerprint};
pub use id::{ClientId, EntityId, EntityPattern, FullTmiId, RequestId, SessionId, SubscriptionId, TmiId};
pub use model::{
    DynamicSpawner, ManagedInstance, Params, Rtls, Spawned, TemplateKind, TmiState, TrustModelInstance,
    TrustModelTemplate,
};
pub use opinion::{SubjectiveOpinion, PRECISION};
pub use quantifier::{
    ControlWeight, DetectorWeights, ExistenceWeighted, MisbehaviorVector, OutputWeight, PassThrough, Quantify,
    TrustSourceQuantifier,
};
pub use registry::TemplateRegistry;
pub use results::{AtlResultSet, NotifyTrigger, PropositionOutcome};
pub use structure::{
    AdjacencyEntry, DiscountOperator, FusionOperator, TrustGraphStructure, TrustRelationship, TrustValues,
};
pub use topology::{DynamicTopology, TopologyPolicy};
pub use update::Update;
