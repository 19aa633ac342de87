//! Wire envelopes and typed payloads.
//!
//! Every message travels in an [`Envelope`] whose `message` field holds
//! the type-specific JSON payload. Inbound payloads are decoded by the
//! [`validator`](crate::validator); outbound payloads are serialized with
//! [`Envelope::new`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use taf_core::{
    AtlResultSet, EntityId, FullTmiId, NotifyTrigger, Params, RequestId, SessionId, SubjectiveOpinion,
    SubscriptionId, TemplateKind, TrustDecision,
};

/// Tag identifying the payload carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TasInitRequest,
    TasInitResponse,
    TasTeardownRequest,
    TasTeardownResponse,
    TasTaRequest,
    TasTaResponse,
    TasSubscribeRequest,
    TasSubscribeResponse,
    TasUnsubscribeRequest,
    TasUnsubscribeResponse,
    TasNotify,
    TasTmtDiscover,
    TasTmtOffer,
    AivSubscribeRequest,
    AivSubscribeResponse,
    AivUnsubscribeRequest,
    AivUnsubscribeResponse,
    AivNotify,
    MbdSubscribeRequest,
    MbdSubscribeResponse,
    MbdUnsubscribeRequest,
    MbdUnsubscribeResponse,
    MbdNotify,
    TchNotify,
    V2xCpm,
    V2xNtm,
}

impl MessageType {
    /// Client requests that must carry a response topic.
    #[must_use]
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            Self::TasInitRequest
                | Self::TasTeardownRequest
                | Self::TasTaRequest
                | Self::TasSubscribeRequest
                | Self::TasUnsubscribeRequest
                | Self::TasTmtDiscover
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(tag)) => f.write_str(&tag),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// Common wrapper of every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_type: MessageType,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Integrity tag over `message`, present when crypto is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub message: serde_json::Value,
}

impl Envelope {
    /// # Errors
    /// Returns the serializer error if `payload` cannot be represented as JSON.
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_type,
            sender: sender.into(),
            response_topic: None,
            request_id: None,
            signature: None,
            message: serde_json::to_value(payload)?,
        })
    }

    #[must_use]
    pub fn with_response_topic(mut self, topic: impl Into<String>) -> Self {
        self.response_topic = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Decodes the payload.
    ///
    /// # Errors
    /// Returns the deserializer error if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.message)
    }
}

// ── Client requests and responses ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// `name@version` of the template to instantiate.
    pub trust_model_template: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownRequest {
    pub session_id: SessionId,
}

/// Response shape shared by teardown and unsubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    #[must_use]
    pub fn failed(error: impl fmt::Display) -> Self {
        Self { success: false, error: Some(error.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaRequest {
    pub session_id: SessionId,
    /// Restrict the answer to these instances; empty means all.
    #[serde(default)]
    pub filter: Vec<FullTmiId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaResponse {
    pub session_id: SessionId,
    #[serde(default)]
    pub results: Vec<TmiResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub session_id: SessionId,
    #[serde(default)]
    pub filter: Vec<FullTmiId>,
    pub trigger: NotifyTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    pub session_id: SessionId,
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notify {
    pub session_id: SessionId,
    pub subscription_id: SubscriptionId,
    pub updates: Vec<TmiResult>,
}

/// Latest actual trust levels of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmiResult {
    pub id: FullTmiId,
    pub version: u64,
    pub propositions: Vec<PropositionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropositionResult {
    pub proposition_id: EntityId,
    pub actual_trustworthiness_level: Vec<AtlEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_decision: Option<TrustDecision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "output", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtlEntry {
    SubjectiveLogicOpinion(SubjectiveOpinion),
    ProjectedProbability(f64),
}

impl From<&AtlResultSet> for TmiResult {
    fn from(results: &AtlResultSet) -> Self {
        Self {
            id: results.tmi().clone(),
            version: results.version(),
            propositions: results
                .propositions()
                .map(|row| PropositionResult {
                    proposition_id: row.proposition.clone(),
                    actual_trustworthiness_level: vec![
                        AtlEntry::SubjectiveLogicOpinion(*row.opinion),
                        AtlEntry::ProjectedProbability(row.projected_probability),
                    ],
                    trust_decision: row.trust_decision,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmtOffer {
    /// Keyed by `name@version`.
    pub trust_model_templates: BTreeMap<String, TemplateDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub kind: TemplateKind,
}

// ── Evidence sources ──────────────────────────────────────────────────

/// Subscribe acknowledgement of the attestation verifier or the
/// misbehavior detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
}

impl SubscribeAck {
    /// The granted subscription, or why none was granted.
    ///
    /// # Errors
    /// Returns the reported error, or a generic reason if the source
    /// sent neither an error nor a subscription id.
    pub fn outcome(self) -> Result<SubscriptionId, String> {
        match (self.error, self.subscription_id) {
            (Some(error), _) => Err(error),
            (None, Some(id)) => Ok(id),
            (None, None) => Err("response carries no subscription id".to_owned()),
        }
    }
}

/// Unsubscribe acknowledgement; only logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AivSubscribeRequest {
    pub attestation_certificate: String,
    pub check_interval: u64,
    pub subscribe: Vec<ClaimQuery>,
}

/// Claims requested for one trustee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimQuery {
    #[serde(rename = "requestedClaims")]
    pub requested_claims: Vec<String>,
    #[serde(rename = "TrusteeID")]
    pub trustee_id: String,
}

/// Unsubscribe request to the attestation verifier or the misbehavior detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequestToSource {
    pub attestation_certificate: String,
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MbdSubscribeRequest {
    pub attestation_certificate: String,
    pub subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AivNotify {
    pub subscription_id: SubscriptionId,
    #[serde(default)]
    pub trustee_reports: Vec<AivTrusteeReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AivTrusteeReport {
    #[serde(rename = "trusteeID")]
    pub trustee_id: String,
    #[serde(rename = "attestationReport", default)]
    pub attestation_report: Vec<ClaimReport>,
}

/// One appraised claim: `1` positive, `0` negative, `-1` control missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReport {
    pub claim: String,
    pub appraisal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbdNotify {
    #[serde(rename = "CPM_REPORT")]
    pub cpm_report: CpmReport,
    #[serde(rename = "subscriptionId")]
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpmReport {
    pub content: CpmReportContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpmReportContent {
    #[serde(rename = "observationSet", default)]
    pub observation_set: Vec<Observation>,
    #[serde(rename = "V2XPduEvidence")]
    pub pdu_evidence: PduEvidence,
}

/// Detector verdict on one perceived object: `check` is the fired-detector bitmask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub check: u8,
    pub target_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PduEvidence {
    pub source_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TchNotify {
    pub tch_report: TchReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TchReport {
    #[serde(rename = "trusteeID")]
    pub trustee_id: String,
    #[serde(rename = "trusteeReports", default)]
    pub trustee_reports: Vec<TchTrusteeReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TchTrusteeReport {
    #[serde(rename = "componentID", default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(rename = "attestationReport", default)]
    pub attestation_report: Vec<ClaimReport>,
}

/// Collective perception message of one vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2xCpm {
    #[serde(rename = "sourceId")]
    pub source_id: u64,
    #[serde(rename = "PerceivedObjectContainer", default)]
    pub perceived_objects: PerceivedObjectContainer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceivedObjectContainer {
    #[serde(default)]
    pub objects: Vec<PerceivedObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceivedObject {
    pub object_id: u64,
}

/// Peer opinions relayed by the network trust module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2xNtm {
    #[serde(default)]
    pub v2x_source_set: Option<Vec<NtmEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NtmEntry {
    pub v2x_source_id: i64,
    pub opinion: RawOpinion,
}

/// Opinion components as received, validated by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOpinion {
    pub belief: f64,
    pub disbelief: f64,
    pub uncertainty: f64,
    pub base_rate: f64,
}
