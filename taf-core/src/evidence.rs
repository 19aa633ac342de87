//! Evidence taxonomy shared by trust sources and quantifiers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::opinion::SubjectiveOpinion;

/// Kind of evidence source feeding the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustSource {
    /// Attestation and integrity verification (per-session subscriptions).
    Aiv,
    /// Misbehavior detection (one shared subscription).
    Mbd,
    /// Trust chain reports.
    Tch,
    /// Peer opinions relayed over V2X.
    Ntm,
}

impl TrustSource {
    pub const ALL: [Self; 4] = [Self::Aiv, Self::Mbd, Self::Tch, Self::Ntm];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aiv => "AIV",
            Self::Mbd => "MBD",
            Self::Tch => "TCH",
            Self::Ntm => "NTM",
        }
    }
}

impl fmt::Display for TrustSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security control reported on by attestation-style sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityControl {
    SecureBoot,
    SecureOta,
    AccessControl,
    ApplicationIsolation,
    ControlFlowIntegrity,
    ConfigurationIntegrityVerification,
}

impl SecurityControl {
    pub const ALL: [Self; 6] = [
        Self::SecureBoot,
        Self::SecureOta,
        Self::AccessControl,
        Self::ApplicationIsolation,
        Self::ControlFlowIntegrity,
        Self::ConfigurationIntegrityVerification,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecureBoot => "SECURE_BOOT",
            Self::SecureOta => "SECURE_OTA",
            Self::AccessControl => "ACCESS_CONTROL",
            Self::ApplicationIsolation => "APPLICATION_ISOLATION",
            Self::ControlFlowIntegrity => "CONTROL_FLOW_INTEGRITY",
            Self::ConfigurationIntegrityVerification => "CONFIGURATION_INTEGRITY_VERIFICATION",
        }
    }
}

impl FromStr for SecurityControl {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEvidence { name: s.to_owned() })
    }
}

impl fmt::Display for SecurityControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed piece of evidence a quantifier may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvidenceType {
    Aiv(SecurityControl),
    Tch(SecurityControl),
    MisbehaviorReport,
    RemoteOpinion,
}

impl EvidenceType {
    #[must_use]
    pub fn source(self) -> TrustSource {
        match self {
            Self::Aiv(_) => TrustSource::Aiv,
            Self::Tch(_) => TrustSource::Tch,
            Self::MisbehaviorReport => TrustSource::Mbd,
            Self::RemoteOpinion => TrustSource::Ntm,
        }
    }

    /// Resolves a claim name as reported by `source`.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownEvidence`] if `source` has no such claim.
    pub fn by_source_and_name(source: TrustSource, name: &str) -> Result<Self, CoreError> {
        match source {
            TrustSource::Aiv => name.parse().map(Self::Aiv),
            TrustSource::Tch => name.parse().map(Self::Tch),
            TrustSource::Mbd if name == "MISBEHAVIOR_REPORT" => Ok(Self::MisbehaviorReport),
            TrustSource::Ntm if name == "REMOTE_OPINION" => Ok(Self::RemoteOpinion),
            _ => Err(CoreError::UnknownEvidence { name: format!("{source}_{name}") }),
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aiv(c) => write!(f, "AIV_{c}"),
            Self::Tch(c) => write!(f, "TCH_{c}"),
            Self::MisbehaviorReport => f.write_str("MBD_MISBEHAVIOR_REPORT"),
            Self::RemoteOpinion => f.write_str("NTM_REMOTE_OPINION"),
        }
    }
}

/// Verdict on a single security control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Appraisal {
    /// `1`: the control is present and verified.
    Positive,
    /// `0`: the control was checked and failed.
    Negative,
    /// `-1`: the control is not implemented.
    ControlMissing,
    /// Any other value: no usable evidence.
    Inconclusive(i64),
}

impl From<i64> for Appraisal {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::Positive,
            0 => Self::Negative,
            -1 => Self::ControlMissing,
            other => Self::Inconclusive(other),
        }
    }
}

/// The eight misbehavior detectors; bit `k` of a report is detector `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisbehaviorDetector {
    DistPlau,
    SpeePlau,
    SpeeCons,
    PosSpeeCons,
    KalmanPosCons,
    KalmanPosSpeedConsSpeed,
    KalmanPosSpeedConsPos,
    LocalPerceptionVerif,
}

impl MisbehaviorDetector {
    pub const ALL: [Self; 8] = [
        Self::DistPlau,
        Self::SpeePlau,
        Self::SpeeCons,
        Self::PosSpeeCons,
        Self::KalmanPosCons,
        Self::KalmanPosSpeedConsSpeed,
        Self::KalmanPosSpeedConsPos,
        Self::LocalPerceptionVerif,
    ];

    /// Bit position within a misbehavior bitmask.
    #[must_use]
    pub fn bit(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn fired(self, mask: u8) -> bool {
        mask & (1 << self.bit()) != 0
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DistPlau => "DIST_PLAU",
            Self::SpeePlau => "SPEE_PLAU",
            Self::SpeeCons => "SPEE_CONS",
            Self::PosSpeeCons => "POS_SPEE_CONS",
            Self::KalmanPosCons => "KALMAN_POS_CONS",
            Self::KalmanPosSpeedConsSpeed => "KALMAN_POS_SPEED_CONS_SPEED",
            Self::KalmanPosSpeedConsPos => "KALMAN_POS_SPEED_CONS_POS",
            Self::LocalPerceptionVerif => "LOCAL_PERCEPTION_VERIF",
        }
    }
}

impl FromStr for MisbehaviorDetector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEvidence { name: s.to_owned() })
    }
}

impl fmt::Display for MisbehaviorDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single evidence reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvidenceValue {
    Appraisal(Appraisal),
    Bitmask(u8),
    Opinion(SubjectiveOpinion),
}

/// Latest readings for one trustee, keyed by evidence type.
pub type EvidenceMap = BTreeMap<EvidenceType, EvidenceValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appraisal_decodes_integer_codes() {
        assert_eq!(Appraisal::from(1), Appraisal::Positive);
        assert_eq!(Appraisal::from(0), Appraisal::Negative);
        assert_eq!(Appraisal::from(-1), Appraisal::ControlMissing);
        assert_eq!(Appraisal::from(-2), Appraisal::Inconclusive(-2));
    }

    #[test]
    fn evidence_type_resolves_by_source() {
        let aiv = EvidenceType::by_source_and_name(TrustSource::Aiv, "SECURE_BOOT");
        assert_eq!(aiv.ok(), Some(EvidenceType::Aiv(SecurityControl::SecureBoot)));
        let tch = EvidenceType::by_source_and_name(TrustSource::Tch, "SECURE_OTA");
        assert_eq!(tch.ok().map(EvidenceType::source), Some(TrustSource::Tch));
        assert!(EvidenceType::by_source_and_name(TrustSource::Aiv, "NOPE").is_err());
        assert!(EvidenceType::by_source_and_name(TrustSource::Mbd, "SECURE_BOOT").is_err());
    }

    #[test]
    fn detector_bits_follow_declaration_order() {
        for (k, detector) in MisbehaviorDetector::ALL.into_iter().enumerate() {
            assert_eq!(usize::from(detector.bit()), k);
        }
        assert!(MisbehaviorDetector::DistPlau.fired(0b0000_0001));
        assert!(MisbehaviorDetector::LocalPerceptionVerif.fired(0b1000_0000));
        assert!(!MisbehaviorDetector::SpeePlau.fired(0b0000_0001));
    }

    #[test]
    fn detector_names_round_trip() {
        for detector in MisbehaviorDetector::ALL {
            assert_eq!(detector.as_str().parse::<MisbehaviorDetector>().ok(), Some(detector));
        }
    }
}
