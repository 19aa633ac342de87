//! Trust source quantifiers: pure functions from evidence to opinions.
//!
//! Weight configurations are validated when a quantifier is built, so
//! [`Quantify::quantify`] is infallible and always yields a valid opinion.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;
use crate::evidence::{Appraisal, EvidenceMap, EvidenceType, EvidenceValue, MisbehaviorDetector, TrustSource};
use crate::id::{EntityId, EntityPattern};
use crate::opinion::{SubjectiveOpinion, PRECISION};

/// Saturation base of the binary-vector model: `1 - 1.3^(-Σw)`.
const SATURATION_BASE: f64 = 1.3;

/// Maps an evidence bundle to an opinion.
pub trait Quantify: Send + Sync + fmt::Debug {
    fn quantify(&self, evidence: &EvidenceMap) -> SubjectiveOpinion;
}

/// What a negative appraisal of a control does to the opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputWeight {
    /// `0`: the failed check still counts as belief.
    Belief,
    /// `1`: the failed check counts as disbelief.
    Disbelief,
    /// `2`: the failed check forces complete disbelief.
    Critical,
}

impl TryFrom<u8> for OutputWeight {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Belief),
            1 => Ok(Self::Disbelief),
            2 => Ok(Self::Critical),
            other => Err(CoreError::InvalidWeights { reason: format!("output weight {other} not in {{0, 1, 2}}") }),
        }
    }
}

/// Weights of one control in an [`ExistenceWeighted`] quantifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlWeight {
    pub evidence: EvidenceType,
    pub existence: f64,
    pub output: OutputWeight,
}

impl ControlWeight {
    #[must_use]
    pub fn new(evidence: EvidenceType, existence: f64, output: OutputWeight) -> Self {
        Self { evidence, existence, output }
    }
}

/// Weighted existence/output model for attestation-style evidence.
///
/// Each control resolves `existence * prior.uncertainty` of the uncertainty
/// mass. Without a prior the start is full uncertainty.
#[derive(Debug, Clone)]
pub struct ExistenceWeighted {
    controls: Vec<ControlWeight>,
    prior: SubjectiveOpinion,
}

impl ExistenceWeighted {
    /// # Errors
    /// Returns [`CoreError::InvalidWeights`] if a weight is negative or not
    /// finite, a control appears twice, or the existence weights sum to
    /// more than 1.
    pub fn new(controls: Vec<ControlWeight>, prior: Option<SubjectiveOpinion>) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        let mut sum = 0.0;
        for control in &controls {
            if !control.existence.is_finite() || control.existence < 0.0 {
                return Err(CoreError::InvalidWeights {
                    reason: format!("existence weight {} of {} must be a non-negative number", control.existence, control.evidence),
                });
            }
            if !seen.insert(control.evidence) {
                return Err(CoreError::InvalidWeights { reason: format!("{} configured twice", control.evidence) });
            }
            sum += control.existence;
        }
        if sum > 1.0 + PRECISION {
            return Err(CoreError::InvalidWeights { reason: format!("existence weights sum to {sum}, exceeding 1.0") });
        }
        Ok(Self { controls, prior: prior.unwrap_or(SubjectiveOpinion::FULL_UNCERTAINTY) })
    }

    #[must_use]
    pub fn controls(&self) -> &[ControlWeight] {
        &self.controls
    }
}

fn appraisal(evidence: &EvidenceMap, control: &ControlWeight) -> Option<Appraisal> {
    match evidence.get(&control.evidence) {
        Some(EvidenceValue::Appraisal(appraisal)) => Some(*appraisal),
        _ => None,
    }
}

impl Quantify for ExistenceWeighted {
    fn quantify(&self, evidence: &EvidenceMap) -> SubjectiveOpinion {
        let critical_failure = self.controls.iter().any(|control| {
            control.output == OutputWeight::Critical
                && appraisal(evidence, control) == Some(Appraisal::Negative)
        });
        if critical_failure {
            return SubjectiveOpinion::FULL_DISBELIEF;
        }

        let scale = self.prior.uncertainty();
        let (mut belief, mut disbelief) = (self.prior.belief(), self.prior.disbelief());
        for control in &self.controls {
            let delta = control.existence * scale;
            match appraisal(evidence, control) {
                Some(Appraisal::Positive) => belief += delta,
                Some(Appraisal::ControlMissing) => disbelief += delta,
                Some(Appraisal::Negative) => match control.output {
                    OutputWeight::Belief => belief += delta,
                    OutputWeight::Disbelief => disbelief += delta,
                    // short-circuited above
                    OutputWeight::Critical => {}
                },
                Some(Appraisal::Inconclusive(_)) | None => {}
            }
        }
        SubjectiveOpinion::from_belief_disbelief(belief, disbelief, self.prior.base_rate()).unwrap_or(self.prior)
    }
}

/// Per-detector weights of the binary-vector model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorWeights {
    pub no_detection: [f64; 8],
    pub detection: [f64; 8],
}

impl DetectorWeights {
    #[must_use]
    pub fn no_detection(&self, detector: MisbehaviorDetector) -> f64 {
        self.no_detection[usize::from(detector.bit())]
    }

    #[must_use]
    pub fn detection(&self, detector: MisbehaviorDetector) -> f64 {
        self.detection[usize::from(detector.bit())]
    }
}

/// Weighted binary-vector model for misbehavior detector bitmasks.
///
/// Fired detectors contribute their detection weight to disbelief, silent
/// ones their no-detection weight to belief. Confidence saturates as
/// `1 - 1.3^(-Σw)`.
#[derive(Debug, Clone)]
pub struct MisbehaviorVector {
    weights: DetectorWeights,
}

impl MisbehaviorVector {
    /// # Errors
    /// Returns [`CoreError::InvalidWeights`] if any weight is negative or not finite.
    pub fn new(weights: DetectorWeights) -> Result<Self, CoreError> {
        let all = weights.no_detection.iter().chain(&weights.detection);
        if let Some(bad) = all.copied().find(|w| !w.is_finite() || *w < 0.0) {
            return Err(CoreError::InvalidWeights { reason: format!("detector weight {bad} must be a non-negative number") });
        }
        Ok(Self { weights })
    }

    #[must_use]
    pub fn weights(&self) -> &DetectorWeights {
        &self.weights
    }
}

impl Quantify for MisbehaviorVector {
    fn quantify(&self, evidence: &EvidenceMap) -> SubjectiveOpinion {
        let Some(EvidenceValue::Bitmask(mask)) = evidence.get(&EvidenceType::MisbehaviorReport) else {
            return SubjectiveOpinion::FULL_UNCERTAINTY;
        };

        let (mut sum_belief, mut sum_disbelief) = (0.0, 0.0);
        for detector in MisbehaviorDetector::ALL {
            if detector.fired(*mask) {
                sum_disbelief += self.weights.detection(detector);
            } else {
                sum_belief += self.weights.no_detection(detector);
            }
        }
        let sum = sum_belief + sum_disbelief;
        if sum <= 0.0 {
            return SubjectiveOpinion::FULL_UNCERTAINTY;
        }

        let saturation = 1.0 - SATURATION_BASE.powf(-sum);
        let belief = sum_belief / sum * saturation;
        let disbelief = sum_disbelief / sum * saturation;
        SubjectiveOpinion::from_belief_disbelief(belief, disbelief, 0.5).unwrap_or(SubjectiveOpinion::FULL_UNCERTAINTY)
    }
}

/// Relays a remote opinion unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Quantify for PassThrough {
    fn quantify(&self, evidence: &EvidenceMap) -> SubjectiveOpinion {
        match evidence.get(&EvidenceType::RemoteOpinion) {
            Some(EvidenceValue::Opinion(opinion)) => *opinion,
            _ => SubjectiveOpinion::FULL_UNCERTAINTY,
        }
    }
}

/// A quantifier bound to the trust relationship it produces opinions for.
#[derive(Debug, Clone)]
pub struct TrustSourceQuantifier {
    pub trustor: EntityPattern,
    pub trustee: EntityPattern,
    pub scope: EntityPattern,
    pub source: TrustSource,
    pub evidence: Vec<EvidenceType>,
    quantifier: Arc<dyn Quantify>,
}

impl TrustSourceQuantifier {
    pub fn new(
        trustor: EntityPattern,
        trustee: EntityPattern,
        scope: EntityPattern,
        source: TrustSource,
        evidence: Vec<EvidenceType>,
        quantifier: impl Quantify + 'static,
    ) -> Self {
        Self { trustor, trustee, scope, source, evidence, quantifier: Arc::new(quantifier) }
    }

    /// Returns `true` if this quantifier handles `source` evidence about `trustee`.
    #[must_use]
    pub fn applies_to(&self, source: TrustSource, trustee: &EntityId) -> bool {
        self.source == source && self.trustee.matches(trustee)
    }

    #[must_use]
    pub fn quantify(&self, evidence: &EvidenceMap) -> SubjectiveOpinion {
        self.quantifier.quantify(evidence)
    }
}
