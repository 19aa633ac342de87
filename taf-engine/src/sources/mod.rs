//! Trust source handlers, one per evidence source.
//!
//! A handler owns the subscription lifecycle toward its source and turns
//! raw evidence into atomic opinion updates through the quantifiers of
//! every affected session. Handlers never touch instances: they hand
//! updates and outbound requests to a [`TamAccess`] sink, which the
//! assessment manager applies after the handler returns.

mod aiv;
mod mbd;
mod ntm;
mod tch;

pub use aiv::AivHandler;
pub use mbd::MbdHandler;
pub use ntm::NtmHandler;
pub use tch::TchHandler;

use serde::Serialize;
use taf_core::{
    CompletionParty, EntityId, EvidenceMap, RequestId, SessionId, TrustSource, TrustSourceQuantifier, Update,
};

use crate::config::EngineConfig;
use crate::message::{Envelope, MessageType};
use crate::session::{Session, SessionTable};
use crate::transport::Outbound;
use crate::EngineError;

/// What a handler may see of and ask from the assessment manager.
pub trait TamAccess {
    fn session(&self, id: &SessionId) -> Option<&Session>;

    fn config(&self) -> &EngineConfig;

    /// Certificate presented when subscribing to a source.
    fn attestation_certificate(&self) -> &str;

    /// Queues `updates` for every instance of `session`.
    fn dispatch(&mut self, session: &SessionId, updates: Vec<Update>);

    fn send(&mut self, outbound: Outbound);
}

/// Uniform capability set of a trust source handler.
pub trait TrustSourceHandler {
    type Notify;

    fn trust_source(&self) -> TrustSource;

    /// Registers `session`; `party` settles once the session can receive evidence.
    fn add_session(&mut self, session: &Session, party: CompletionParty<EngineError>, access: &mut dyn TamAccess);

    /// Unregisters `session`; `party` settles once it no longer receives evidence.
    fn remove_session(&mut self, session: &SessionId, party: CompletionParty<EngineError>, access: &mut dyn TamAccess);

    fn handle_notify(&mut self, notify: Self::Notify, access: &mut dyn TamAccess);

    fn registered_sessions(&self) -> Vec<SessionId>;
}

/// [`TamAccess`] that buffers effects for the manager to apply afterwards.
pub struct Effects<'a> {
    sessions: &'a SessionTable,
    config: &'a EngineConfig,
    certificate: &'a str,
    dispatches: Vec<(SessionId, Vec<Update>)>,
    outbound: Vec<Outbound>,
}

impl<'a> Effects<'a> {
    #[must_use]
    pub fn new(sessions: &'a SessionTable, config: &'a EngineConfig, certificate: &'a str) -> Self {
        Self { sessions, config, certificate, dispatches: Vec::new(), outbound: Vec::new() }
    }

    /// Buffered updates per session and outbound messages, in request order.
    #[must_use]
    pub fn into_parts(self) -> (Vec<(SessionId, Vec<Update>)>, Vec<Outbound>) {
        (self.dispatches, self.outbound)
    }
}

impl TamAccess for Effects<'_> {
    fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    fn config(&self) -> &EngineConfig {
        self.config
    }

    fn attestation_certificate(&self) -> &str {
        self.certificate
    }

    fn dispatch(&mut self, session: &SessionId, updates: Vec<Update>) {
        if !updates.is_empty() {
            self.dispatches.push((session.clone(), updates));
        }
    }

    fn send(&mut self, outbound: Outbound) {
        self.outbound.push(outbound);
    }
}

/// Sends a request to `topic` that the source answers on our endpoint.
///
/// # Errors
/// Returns [`EngineError::Json`] if the payload cannot be serialized.
fn request(
    access: &mut dyn TamAccess,
    topic: &str,
    message_type: MessageType,
    payload: &impl Serialize,
) -> Result<RequestId, EngineError> {
    let request_id = RequestId::generate();
    let envelope = Envelope::new(message_type, access.config().identifier.clone(), payload)?
        .with_response_topic(access.config().communication.taf_endpoint.clone())
        .with_request_id(Some(request_id.clone()));
    access.send(Outbound { topic: topic.to_owned(), envelope });
    Ok(request_id)
}

/// Concrete trustee of `quantifier`'s kind for raw source identifiers,
/// such as `V_5` or `vehicle_5` for `["5"]`.
fn trustee_of_kind(quantifier: &TrustSourceQuantifier, segments: &[&str]) -> Option<EntityId> {
    let trustee = EntityId::new(quantifier.trustee.kind(), segments.iter().copied()).ok()?;
    quantifier.applies_to(quantifier.source, &trustee).then_some(trustee)
}

/// Runs `quantifier` on `evidence` and wraps the opinion as an update.
fn quantify(
    session: &SessionId,
    quantifier: &TrustSourceQuantifier,
    trustee: EntityId,
    evidence: &EvidenceMap,
) -> Option<Update> {
    let Some(trustor) = quantifier.trustor.as_concrete() else {
        tracing::warn!(%session, trustor = %quantifier.trustor, "quantifier trustor is not concrete, skipping");
        return None;
    };
    let opinion = quantifier.quantify(evidence);
    tracing::debug!(%session, source = %quantifier.source, %trustee, %opinion, ?evidence, "quantified evidence");
    Some(Update::atomic(opinion, quantifier.source, trustor, trustee))
}
