//! Misbehavior detection.
//!
//! One subscription at the detector serves every session: it is requested
//! when the first session registers and cancelled when the last one leaves.

use std::collections::BTreeSet;

use taf_core::{
    CompletionParty, EntityId, EvidenceMap, EvidenceType, EvidenceValue, RequestId, SessionId, SubscriptionId,
    TrustSource,
};

use super::{quantify, request, trustee_of_kind, TamAccess, TrustSourceHandler};
use crate::message::{MbdNotify, MbdSubscribeRequest, MessageType, SubscribeAck, UnsubscribeAck, UnsubscribeRequestToSource};
use crate::session::Session;
use crate::EngineError;

enum Subscription {
    Inactive,
    /// Requested; parties wait for the detector's answer.
    Pending { request: RequestId, waiting: Vec<CompletionParty<EngineError>> },
    Active(SubscriptionId),
}

pub struct MbdHandler {
    sessions: BTreeSet<SessionId>,
    subscription: Subscription,
}

impl Default for MbdHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MbdHandler {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: BTreeSet::new(), subscription: Subscription::Inactive }
    }

    #[must_use]
    pub fn subscription_id(&self) -> Option<&SubscriptionId> {
        match &self.subscription {
            Subscription::Active(id) => Some(id),
            Subscription::Inactive | Subscription::Pending { .. } => None,
        }
    }

    fn subscribe(&mut self, party: CompletionParty<EngineError>, access: &mut dyn TamAccess) {
        let payload =
            MbdSubscribeRequest { attestation_certificate: access.attestation_certificate().to_owned(), subscribe: true };
        let topic = access.config().communication.mbd_endpoint.clone();
        match request(access, &topic, MessageType::MbdSubscribeRequest, &payload) {
            Ok(request) => {
                tracing::info!(%request, "requesting shared MBD subscription");
                self.subscription = Subscription::Pending { request, waiting: vec![party] };
            }
            Err(e) => party.reject(e),
        }
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId, access: &mut dyn TamAccess) {
        tracing::info!(%subscription, "cancelling shared MBD subscription");
        self.subscription = Subscription::Inactive;
        let payload = UnsubscribeRequestToSource {
            attestation_certificate: access.attestation_certificate().to_owned(),
            subscription_id: subscription,
        };
        let topic = access.config().communication.mbd_endpoint.clone();
        if let Err(e) = request(access, &topic, MessageType::MbdUnsubscribeRequest, &payload) {
            tracing::warn!(error = %e, "could not request MBD unsubscribe");
        }
    }

    /// Settles every party waiting on the shared subscription.
    pub fn handle_subscribe_response(
        &mut self,
        request_id: Option<&RequestId>,
        ack: SubscribeAck,
        access: &mut dyn TamAccess,
    ) {
        let matches = matches!(&self.subscription, Subscription::Pending { request, .. } if Some(request) == request_id);
        if !matches {
            tracing::warn!(?request_id, "MBD subscribe response for unknown request, discarding");
            return;
        }
        let Subscription::Pending { waiting, .. } = std::mem::replace(&mut self.subscription, Subscription::Inactive)
        else {
            return;
        };
        match ack.outcome() {
            Ok(subscription) => {
                tracing::info!(%subscription, sessions = self.sessions.len(), "MBD subscription established");
                if self.sessions.is_empty() {
                    // every session left while the request was in flight
                    self.unsubscribe(subscription, access);
                } else {
                    self.subscription = Subscription::Active(subscription);
                }
                for party in waiting {
                    party.resolve();
                }
            }
            Err(reason) => {
                tracing::warn!(%reason, "MBD subscription refused");
                for party in waiting {
                    party.reject(EngineError::SubscriptionFailed { trust_source: TrustSource::Mbd, reason: reason.clone() });
                }
            }
        }
    }

    pub fn handle_unsubscribe_response(&self, ack: &UnsubscribeAck) {
        match &ack.error {
            Some(error) => tracing::warn!(%error, "MBD unsubscribe failed"),
            None => tracing::debug!("MBD unsubscribe acknowledged"),
        }
    }
}

impl TrustSourceHandler for MbdHandler {
    type Notify = MbdNotify;

    fn trust_source(&self) -> TrustSource {
        TrustSource::Mbd
    }

    fn add_session(&mut self, session: &Session, party: CompletionParty<EngineError>, access: &mut dyn TamAccess) {
        self.sessions.insert(session.id().clone());
        match &mut self.subscription {
            Subscription::Active(_) => party.resolve(),
            Subscription::Pending { waiting, .. } => waiting.push(party),
            Subscription::Inactive => self.subscribe(party, access),
        }
    }

    fn remove_session(&mut self, session: &SessionId, party: CompletionParty<EngineError>, access: &mut dyn TamAccess) {
        self.sessions.remove(session);
        if self.sessions.is_empty() {
            match &self.subscription {
                Subscription::Active(subscription) => {
                    let subscription = subscription.clone();
                    self.subscription = Subscription::Inactive;
                    self.unsubscribe(subscription, access);
                }
                Subscription::Pending { .. } => {
                    tracing::debug!("last MBD session left while subscribing; cancelling once granted");
                }
                Subscription::Inactive => {}
            }
        }
        party.resolve();
    }

    fn handle_notify(&mut self, notify: MbdNotify, access: &mut dyn TamAccess) {
        if self.subscription_id() != Some(&notify.subscription_id) {
            tracing::warn!(subscription = %notify.subscription_id, "unknown subscription for MBD_NOTIFY, discarding message");
            return;
        }
        let source = notify.cpm_report.content.pdu_evidence.source_id.to_string();
        let observed: Vec<(EntityId, EvidenceMap)> = notify
            .cpm_report
            .content
            .observation_set
            .iter()
            .map(|observation| {
                let object = EntityId::observation(&source, observation.target_id);
                let evidence =
                    EvidenceMap::from([(EvidenceType::MisbehaviorReport, EvidenceValue::Bitmask(observation.check))]);
                (object, evidence)
            })
            .collect();

        for session_id in &self.sessions {
            let Some(session) = access.session(session_id) else {
                continue;
            };
            let mut updates = Vec::new();
            for (object, evidence) in &observed {
                for quantifier in session.quantifiers_for(TrustSource::Mbd) {
                    let trustee = if quantifier.applies_to(TrustSource::Mbd, object) {
                        Some(object.clone())
                    } else {
                        // vehicle-level quantifiers rate the reporting vehicle
                        trustee_of_kind(quantifier, &[source.as_str()])
                    };
                    if let Some(trustee) = trustee {
                        updates.extend(quantify(session_id, quantifier, trustee, evidence));
                    }
                }
            }
            access.dispatch(session_id, updates);
        }
    }

    fn registered_sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().cloned().collect()
    }
}
