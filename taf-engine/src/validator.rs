//! Decoding of inbound envelopes into typed commands.

use std::fmt;

use crate::message::{
    AivNotify, Envelope, InitRequest, MbdNotify, MessageType, SubscribeAck, SubscribeRequest, TaRequest, TchNotify,
    TeardownRequest, UnsubscribeAck, UnsubscribeRequest, V2xCpm, V2xNtm,
};

/// Every message the engine accepts, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Init(InitRequest),
    Teardown(TeardownRequest),
    Ta(TaRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    TmtDiscover,
    AivSubscribeResponse(SubscribeAck),
    AivUnsubscribeResponse(UnsubscribeAck),
    AivNotify(AivNotify),
    MbdSubscribeResponse(SubscribeAck),
    MbdUnsubscribeResponse(UnsubscribeAck),
    MbdNotify(MbdNotify),
    TchNotify(TchNotify),
    V2xCpm(V2xCpm),
    V2xNtm(V2xNtm),
}

/// Why an envelope was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub message_type: MessageType,
    pub problems: Vec<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.message_type, self.problems.join("; "))
    }
}

impl std::error::Error for Diagnostics {}

/// Checks an envelope against the schema of its message type.
pub trait SchemaValidator: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns [`Diagnostics`] listing every problem found.
    fn validate(&self, envelope: &Envelope) -> Result<Inbound, Diagnostics>;
}

/// Validates by decoding into the typed payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeValidator;

impl SerdeValidator {
    fn decode(envelope: &Envelope) -> Result<Inbound, String> {
        let decoded = match envelope.message_type {
            MessageType::TasInitRequest => Inbound::Init(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::TasTeardownRequest => Inbound::Teardown(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::TasTaRequest => Inbound::Ta(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::TasSubscribeRequest => Inbound::Subscribe(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::TasUnsubscribeRequest => {
                Inbound::Unsubscribe(envelope.decode().map_err(|e| e.to_string())?)
            }
            MessageType::TasTmtDiscover => Inbound::TmtDiscover,
            MessageType::AivSubscribeResponse => {
                Inbound::AivSubscribeResponse(envelope.decode().map_err(|e| e.to_string())?)
            }
            MessageType::AivUnsubscribeResponse => {
                Inbound::AivUnsubscribeResponse(envelope.decode().map_err(|e| e.to_string())?)
            }
            MessageType::AivNotify => Inbound::AivNotify(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::MbdSubscribeResponse => {
                Inbound::MbdSubscribeResponse(envelope.decode().map_err(|e| e.to_string())?)
            }
            MessageType::MbdUnsubscribeResponse => {
                Inbound::MbdUnsubscribeResponse(envelope.decode().map_err(|e| e.to_string())?)
            }
            MessageType::MbdNotify => Inbound::MbdNotify(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::TchNotify => Inbound::TchNotify(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::V2xCpm => Inbound::V2xCpm(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::V2xNtm => Inbound::V2xNtm(envelope.decode().map_err(|e| e.to_string())?),
            MessageType::TasInitResponse
            | MessageType::TasTeardownResponse
            | MessageType::TasTaResponse
            | MessageType::TasSubscribeResponse
            | MessageType::TasUnsubscribeResponse
            | MessageType::TasNotify
            | MessageType::TasTmtOffer
            | MessageType::AivSubscribeRequest
            | MessageType::AivUnsubscribeRequest
            | MessageType::MbdSubscribeRequest
            | MessageType::MbdUnsubscribeRequest => {
                return Err("message type is only ever sent by this engine".to_owned());
            }
        };
        Ok(decoded)
    }
}

impl SchemaValidator for SerdeValidator {
    fn validate(&self, envelope: &Envelope) -> Result<Inbound, Diagnostics> {
        let mut problems = Vec::new();
        if envelope.sender.trim().is_empty() {
            problems.push("sender is empty".to_owned());
        }
        if envelope.message_type.expects_response() && envelope.response_topic.as_deref().is_none_or(str::is_empty) {
            problems.push("responseTopic is required".to_owned());
        }
        let decoded = Self::decode(envelope).map_err(|problem| problems.push(problem)).ok();
        if let Some(Inbound::Init(request)) = &decoded {
            if request.trust_model_template.trim().is_empty() {
                problems.push("trustModelTemplate is empty".to_owned());
            }
        }
        match decoded {
            Some(inbound) if problems.is_empty() => Ok(inbound),
            _ => Err(Diagnostics { message_type: envelope.message_type, problems }),
        }
    }
}
