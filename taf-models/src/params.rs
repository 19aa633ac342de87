//! Parameter parsing shared by the built-in templates.
//!
//! Weights arrive as string parameters at spawn time and are validated
//! here, before any quantifier runs.

use taf_core::model::float_param;
use taf_core::{
    ControlWeight, CoreError, DetectorWeights, EvidenceType, ExistenceWeighted, MisbehaviorDetector,
    MisbehaviorVector, OutputWeight, Params, SecurityControl, SubjectiveOpinion, TopologyPolicy,
};

pub const MBD_DETECTION_PREFIX: &str = "MBD_D_";
pub const MBD_NO_DETECTION_PREFIX: &str = "MBD_ND_";
pub const EWMA_ALPHA: &str = "MBD_EWMA_ALPHA";
pub const TOPOLOGY_POLICY: &str = "TOPOLOGY_POLICY";
/// Prefix of the required trust level override keys.
pub const RTL: &str = "RTL";

/// Key prefixes of one set of per-control weights, each followed by a
/// control name such as `SECURE_BOOT`.
#[derive(Debug, Clone, Copy)]
pub struct WeightKeys {
    pub existence: &'static str,
    pub output: &'static str,
}

pub const TCH_KEYS: WeightKeys = WeightKeys { existence: "TCH_EXISTENCE_", output: "TCH_OUTPUT_" };

/// Default existence and output weight per control for trust-chain evidence.
pub const TCH_DEFAULTS: [(SecurityControl, f64, u8); 6] = [
    (SecurityControl::SecureBoot, 0.24, 2),
    (SecurityControl::AccessControl, 0.16, 1),
    (SecurityControl::ControlFlowIntegrity, 0.08, 2),
    (SecurityControl::SecureOta, 0.08, 0),
    (SecurityControl::ApplicationIsolation, 0.16, 0),
    (SecurityControl::ConfigurationIntegrityVerification, 0.24, 2),
];

pub const MBD_NO_DETECTION_DEFAULTS: [f64; 8] = [1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
pub const MBD_DETECTION_DEFAULTS: [f64; 8] = [2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 2.0];

fn invalid(key: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidParameter { key: key.to_owned(), reason: reason.into() }
}

/// Rejects keys under a known prefix whose suffix names nothing.
fn check_suffixes<T>(params: &Params, prefix: &str, known: impl Fn(&str) -> Result<T, CoreError>) -> Result<(), CoreError> {
    for key in params.keys() {
        if let Some(suffix) = key.strip_prefix(prefix) {
            known(suffix).map_err(|_| invalid(key, format!("unknown name '{suffix}'")))?;
        }
    }
    Ok(())
}

/// Builds an attestation quantifier from `defaults` overridden by
/// `<existence prefix><CONTROL>` / `<output prefix><CONTROL>`.
///
/// # Errors
/// Returns [`CoreError::InvalidParameter`] for unknown control names or
/// non-numeric values and [`CoreError::InvalidWeights`] for weights the
/// quantifier rejects.
pub fn existence_weighted(
    params: &Params,
    keys: WeightKeys,
    defaults: &[(SecurityControl, f64, u8)],
    evidence: fn(SecurityControl) -> EvidenceType,
    prior: Option<SubjectiveOpinion>,
) -> Result<ExistenceWeighted, CoreError> {
    check_suffixes(params, keys.existence, str::parse::<SecurityControl>)?;
    check_suffixes(params, keys.output, str::parse::<SecurityControl>)?;

    let mut controls = Vec::with_capacity(defaults.len());
    for &(control, existence, output) in defaults {
        let existence_key = format!("{}{control}", keys.existence);
        let output_key = format!("{}{control}", keys.output);
        let existence = float_param(params, &existence_key)?.unwrap_or(existence);
        let output = match params.get(&output_key) {
            Some(raw) => raw.trim().parse::<u8>().map_err(|e| invalid(&output_key, e.to_string()))?,
            None => output,
        };
        controls.push(ControlWeight::new(evidence(control), existence, OutputWeight::try_from(output)?));
    }
    ExistenceWeighted::new(controls, prior)
}

/// Builds the misbehavior quantifier from the defaults overridden by
/// `MBD_D_<DETECTOR>` / `MBD_ND_<DETECTOR>`.
///
/// # Errors
/// Returns [`CoreError::InvalidParameter`] for unknown detector names or
/// non-numeric values and [`CoreError::InvalidWeights`] for negative weights.
pub fn misbehavior_vector(params: &Params) -> Result<MisbehaviorVector, CoreError> {
    check_suffixes(params, MBD_DETECTION_PREFIX, str::parse::<MisbehaviorDetector>)?;
    check_suffixes(params, MBD_NO_DETECTION_PREFIX, str::parse::<MisbehaviorDetector>)?;

    let mut weights = DetectorWeights { no_detection: MBD_NO_DETECTION_DEFAULTS, detection: MBD_DETECTION_DEFAULTS };
    for detector in MisbehaviorDetector::ALL {
        let slot = usize::from(detector.bit());
        if let Some(w) = float_param(params, &format!("{MBD_DETECTION_PREFIX}{detector}"))? {
            weights.detection[slot] = w;
        }
        if let Some(w) = float_param(params, &format!("{MBD_NO_DETECTION_PREFIX}{detector}"))? {
            weights.no_detection[slot] = w;
        }
    }
    MisbehaviorVector::new(weights)
}

/// Smoothing factor for misbehavior opinions; `1.0` replaces outright.
///
/// # Errors
/// Returns [`CoreError::InvalidParameter`] unless the value lies in `(0, 1]`.
pub fn ewma_alpha(params: &Params) -> Result<f64, CoreError> {
    let alpha = float_param(params, EWMA_ALPHA)?.unwrap_or(1.0);
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(alpha)
    } else {
        Err(invalid(EWMA_ALPHA, format!("{alpha} is outside (0, 1]")))
    }
}

/// # Errors
/// Returns [`CoreError::InvalidParameter`] for anything but `RETAIN` or `PRUNE`.
pub fn topology_policy(params: &Params) -> Result<TopologyPolicy, CoreError> {
    params.get(TOPOLOGY_POLICY).map_or(Ok(TopologyPolicy::default()), |raw| raw.trim().parse())
}

/// Reads an opinion spread over `<prefix>_BELIEF`, `<prefix>_DISBELIEF`,
/// `<prefix>_UNCERTAINTY` and `<prefix>_BASERATE`, or `default` if none is set.
///
/// # Errors
/// Returns [`CoreError::InvalidParameter`] if only some components are set
/// or they do not form a valid opinion.
pub fn opinion(params: &Params, prefix: &str, default: SubjectiveOpinion) -> Result<SubjectiveOpinion, CoreError> {
    let components = ["BELIEF", "DISBELIEF", "UNCERTAINTY", "BASERATE"]
        .map(|component| float_param(params, &format!("{prefix}_{component}")));
    match components {
        [Ok(None), Ok(None), Ok(None), Ok(None)] => Ok(default),
        [Ok(Some(b)), Ok(Some(d)), Ok(Some(u)), Ok(Some(a))] => {
            SubjectiveOpinion::new(b, d, u, a).map_err(|e| invalid(prefix, e.to_string()))
        }
        components => match components.into_iter().find_map(Result::err) {
            Some(e) => Err(e),
            None => Err(invalid(prefix, "belief, disbelief, uncertainty and base rate must be set together")),
        },
    }
}
