//! Attestation and integrity verification.
//!
//! Sessions request different claims, so every session gets its own
//! subscription at the verifier.

use std::collections::{BTreeMap, BTreeSet};

use taf_core::{
    CompletionParty, EntityId, EvidenceMap, EvidenceType, EvidenceValue, RequestId, SessionId, SubscriptionId,
    TrustSource,
};

use super::{quantify, request, TamAccess, TrustSourceHandler};
use crate::message::{
    AivNotify, AivSubscribeRequest, ClaimQuery, MessageType, SubscribeAck, UnsubscribeAck, UnsubscribeRequestToSource,
};
use crate::session::Session;
use crate::EngineError;

struct PendingSubscribe {
    session: SessionId,
    party: CompletionParty<EngineError>,
}

#[derive(Default)]
pub struct AivHandler {
    pending: BTreeMap<RequestId, PendingSubscribe>,
    /// Requests whose session left before the verifier answered; a late
    /// grant is cancelled at once.
    abandoned: BTreeMap<RequestId, SessionId>,
    by_subscription: BTreeMap<SubscriptionId, SessionId>,
    by_session: BTreeMap<SessionId, SubscriptionId>,
}

impl AivHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims to request: every concrete trustee of the session's
    /// attestation quantifiers with the controls they consume.
    fn claim_queries(session: &Session) -> Vec<ClaimQuery> {
        let mut claims: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for quantifier in session.quantifiers_for(TrustSource::Aiv) {
            let Some(trustee) = quantifier.trustee.as_concrete() else {
                tracing::warn!(session = %session.id(), trustee = %quantifier.trustee, "cannot request claims for a trustee pattern");
                continue;
            };
            let names = quantifier.evidence.iter().filter_map(|evidence| match evidence {
                EvidenceType::Aiv(control) => Some(control.to_string()),
                _ => None,
            });
            claims.entry(trustee.to_string()).or_default().extend(names);
        }
        claims
            .into_iter()
            .map(|(trustee_id, requested)| ClaimQuery { requested_claims: requested.into_iter().collect(), trustee_id })
            .collect()
    }

    fn unsubscribe(session: &SessionId, subscription: SubscriptionId, access: &mut dyn TamAccess) {
        let payload = UnsubscribeRequestToSource {
            attestation_certificate: access.attestation_certificate().to_owned(),
            subscription_id: subscription,
        };
        let topic = access.config().communication.aiv_endpoint.clone();
        // best effort: the session is gone whatever the verifier answers
        if let Err(e) = request(access, &topic, MessageType::AivUnsubscribeRequest, &payload) {
            tracing::warn!(%session, error = %e, "could not request AIV unsubscribe");
        }
    }

    /// Settles the pending subscribe request answered by `ack`.
    pub fn handle_subscribe_response(
        &mut self,
        request_id: Option<&RequestId>,
        ack: SubscribeAck,
        access: &mut dyn TamAccess,
    ) {
        if let Some(session) = request_id.and_then(|id| self.abandoned.remove(id)) {
            match ack.outcome() {
                Ok(subscription) => {
                    tracing::info!(%session, %subscription, "AIV subscription granted after the session left, cancelling");
                    Self::unsubscribe(&session, subscription, access);
                }
                Err(reason) => tracing::debug!(%session, %reason, "abandoned AIV subscription refused"),
            }
            return;
        }
        let Some(pending) = request_id.and_then(|id| self.pending.remove(id)) else {
            tracing::warn!(?request_id, "AIV subscribe response for unknown request, discarding");
            return;
        };
        match ack.outcome() {
            Ok(subscription) => {
                tracing::info!(session = %pending.session, %subscription, "AIV subscription established");
                self.by_subscription.insert(subscription.clone(), pending.session.clone());
                self.by_session.insert(pending.session, subscription);
                pending.party.resolve();
            }
            Err(reason) => {
                tracing::warn!(session = %pending.session, %reason, "AIV subscription refused");
                pending.party.reject(EngineError::SubscriptionFailed { trust_source: TrustSource::Aiv, reason });
            }
        }
    }

    pub fn handle_unsubscribe_response(&self, ack: &UnsubscribeAck) {
        match &ack.error {
            Some(error) => tracing::warn!(%error, "AIV unsubscribe failed"),
            None => tracing::debug!("AIV unsubscribe acknowledged"),
        }
    }

    #[must_use]
    pub fn subscription_of(&self, session: &SessionId) -> Option<&SubscriptionId> {
        self.by_session.get(session)
    }
}

impl TrustSourceHandler for AivHandler {
    type Notify = AivNotify;

    fn trust_source(&self) -> TrustSource {
        TrustSource::Aiv
    }

    fn add_session(&mut self, session: &Session, party: CompletionParty<EngineError>, access: &mut dyn TamAccess) {
        let payload = AivSubscribeRequest {
            attestation_certificate: access.attestation_certificate().to_owned(),
            check_interval: access.config().evidence.aiv.check_interval_ms,
            subscribe: Self::claim_queries(session),
        };
        let topic = access.config().communication.aiv_endpoint.clone();
        match request(access, &topic, MessageType::AivSubscribeRequest, &payload) {
            Ok(request_id) => {
                self.pending.insert(request_id, PendingSubscribe { session: session.id().clone(), party });
            }
            Err(e) => party.reject(e),
        }
    }

    fn remove_session(&mut self, session: &SessionId, party: CompletionParty<EngineError>, access: &mut dyn TamAccess) {
        let in_flight: Vec<RequestId> =
            self.pending.iter().filter(|(_, pending)| pending.session == *session).map(|(id, _)| id.clone()).collect();
        for request_id in in_flight {
            if let Some(pending) = self.pending.remove(&request_id) {
                tracing::debug!(%session, request = %request_id, "session left while subscribing; cancelling once granted");
                pending.party.reject(EngineError::SubscriptionFailed {
                    trust_source: TrustSource::Aiv,
                    reason: "session removed while subscribing".to_owned(),
                });
                self.abandoned.insert(request_id, pending.session);
            }
        }
        match self.by_session.remove(session) {
            Some(subscription) => {
                self.by_subscription.remove(&subscription);
                Self::unsubscribe(session, subscription, access);
            }
            None => tracing::debug!(%session, "no AIV subscription to cancel"),
        }
        party.resolve();
    }

    fn handle_notify(&mut self, notify: AivNotify, access: &mut dyn TamAccess) {
        let Some(session_id) = self.by_subscription.get(&notify.subscription_id).cloned() else {
            tracing::warn!(subscription = %notify.subscription_id, "unknown subscription for AIV_NOTIFY, discarding message");
            return;
        };

        let mut reported = Vec::new();
        for report in notify.trustee_reports {
            let trustee = match report.trustee_id.parse::<EntityId>() {
                Ok(trustee) => trustee,
                Err(e) => {
                    tracing::warn!(session = %session_id, trustee = %report.trustee_id, error = %e, "invalid trustee in AIV_NOTIFY");
                    continue;
                }
            };
            let mut readings = EvidenceMap::new();
            for claim in report.attestation_report {
                match EvidenceType::by_source_and_name(TrustSource::Aiv, &claim.claim) {
                    Ok(evidence) => {
                        readings.insert(evidence, EvidenceValue::Appraisal(claim.appraisal.into()));
                    }
                    Err(e) => tracing::warn!(session = %session_id, error = %e, "ignoring unknown claim"),
                }
            }
            reported.push((trustee, readings));
        }

        let Some(session) = access.session(&session_id) else {
            tracing::warn!(session = %session_id, "AIV evidence for vanished session, discarding");
            return;
        };
        let mut updates = Vec::new();
        for (trustee, evidence) in &reported {
            for quantifier in session.quantifiers_for(TrustSource::Aiv) {
                if quantifier.applies_to(TrustSource::Aiv, trustee) {
                    updates.extend(quantify(&session_id, quantifier, trustee.clone(), evidence));
                }
            }
        }
        access.dispatch(&session_id, updates);
    }

    fn registered_sessions(&self) -> Vec<SessionId> {
        self.by_session.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taf_core::{Params, SubjectiveOpinion, TrustModelTemplate, Update};
    use taf_models::VehicleComputerMigration;

    use super::*;
    use crate::config::EngineConfig;
    use crate::message::{AivTrusteeReport, ClaimReport};
    use crate::session::SessionTable;
    use crate::sources::testing::{completion, outcome, session};
    use crate::sources::Effects;

    fn table() -> SessionTable {
        let template: Arc<dyn TrustModelTemplate> = Arc::new(VehicleComputerMigration);
        let s = session("s-1", &template, &Params::new());
        SessionTable::from([(s.id().clone(), s)])
    }

    fn subscribed(handler: &mut AivHandler, sessions: &SessionTable, config: &EngineConfig) {
        let (barrier, slot) = completion();
        let mut effects = Effects::new(sessions, config, "cert");
        let Some(s) = sessions.get(&SessionId::new("s-1")) else {
            panic!("fixture session missing");
        };
        handler.add_session(s, barrier.register(), &mut effects);
        barrier.execute();
        let (_, outbound) = effects.into_parts();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].envelope.message_type, MessageType::AivSubscribeRequest);
        assert_eq!(outbound[0].topic, "aiv");
        assert!(outcome(&slot).is_none(), "must wait for the verifier");

        let ack = SubscribeAck { subscription_id: Some("aiv-sub".into()), ..SubscribeAck::default() };
        let mut effects = Effects::new(sessions, config, "cert");
        handler.handle_subscribe_response(outbound[0].envelope.request_id.as_ref(), ack, &mut effects);
        assert!(effects.into_parts().1.is_empty());
        assert_eq!(outcome(&slot), Some(Ok(())));
    }

    #[test]
    fn subscribe_request_names_claims_per_trustee() {
        let sessions = table();
        let Some(s) = sessions.get(&SessionId::new("s-1")) else {
            panic!("fixture session missing");
        };
        let queries = AivHandler::claim_queries(s);
        assert_eq!(queries.iter().map(|q| q.trustee_id.as_str()).collect::<Vec<_>>(), vec!["VC1", "VC2"]);
        assert_eq!(queries[0].requested_claims.len(), 6);
    }

    #[test]
    fn refused_subscription_rejects_party() {
        let sessions = table();
        let config = EngineConfig::default();
        let mut handler = AivHandler::new();
        let (barrier, slot) = completion();
        let mut effects = Effects::new(&sessions, &config, "");
        let Some(s) = sessions.get(&SessionId::new("s-1")) else {
            panic!("fixture session missing");
        };
        handler.add_session(s, barrier.register(), &mut effects);
        barrier.execute();
        let (_, outbound) = effects.into_parts();
        let ack = SubscribeAck { error: Some("no such trustee".to_owned()), ..SubscribeAck::default() };
        let mut effects = Effects::new(&sessions, &config, "");
        handler.handle_subscribe_response(outbound[0].envelope.request_id.as_ref(), ack, &mut effects);
        assert!(matches!(outcome(&slot), Some(Err(reason)) if reason.contains("no such trustee")));
        assert!(handler.registered_sessions().is_empty());
    }

    #[test]
    fn notify_is_quantified_for_the_subscribed_session() {
        let sessions = table();
        let config = EngineConfig::default();
        let mut handler = AivHandler::new();
        subscribed(&mut handler, &sessions, &config);

        let notify = AivNotify {
            subscription_id: "aiv-sub".into(),
            trustee_reports: vec![AivTrusteeReport {
                trustee_id: "VC1".to_owned(),
                attestation_report: vec![ClaimReport { claim: "SECURE_BOOT".to_owned(), appraisal: 1 }],
            }],
        };
        let mut effects = Effects::new(&sessions, &config, "");
        handler.handle_notify(notify, &mut effects);
        let (dispatches, _) = effects.into_parts();
        assert_eq!(dispatches.len(), 1);
        let (session, updates) = &dispatches[0];
        assert_eq!(session, &SessionId::new("s-1"));
        match updates.as_slice() {
            [Update::AtomicTrustOpinion { opinion, trustee, trustor, .. }] => {
                assert_eq!(trustee.to_string(), "VC1");
                assert_eq!(trustor.to_string(), "TAF");
                assert!(opinion.belief() > 0.2, "positive claim must add belief to the prior");
                assert!(!opinion.approx_eq(&SubjectiveOpinion::FULL_UNCERTAINTY));
            }
            other => panic!("expected one opinion update, got {other:?}"),
        }
    }

    #[test]
    fn unknown_subscription_is_discarded() {
        let sessions = table();
        let config = EngineConfig::default();
        let mut handler = AivHandler::new();
        subscribed(&mut handler, &sessions, &config);
        let notify = AivNotify { subscription_id: "other".into(), trustee_reports: Vec::new() };
        let mut effects = Effects::new(&sessions, &config, "");
        handler.handle_notify(notify, &mut effects);
        let (dispatches, outbound) = effects.into_parts();
        assert!(dispatches.is_empty() && outbound.is_empty());
    }

    #[test]
    fn removing_session_unsubscribes() {
        let sessions = table();
        let config = EngineConfig::default();
        let mut handler = AivHandler::new();
        subscribed(&mut handler, &sessions, &config);
        assert_eq!(handler.subscription_of(&SessionId::new("s-1")), Some(&SubscriptionId::new("aiv-sub")));

        let (barrier, slot) = completion();
        let mut effects = Effects::new(&sessions, &config, "");
        handler.remove_session(&SessionId::new("s-1"), barrier.register(), &mut effects);
        barrier.execute();
        let (_, outbound) = effects.into_parts();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].envelope.message_type, MessageType::AivUnsubscribeRequest);
        assert_eq!(outcome(&slot), Some(Ok(())));
        assert!(handler.registered_sessions().is_empty());
    }

    #[test]
    fn grant_after_the_session_left_cancels_immediately() {
        let sessions = table();
        let config = EngineConfig::default();
        let mut handler = AivHandler::new();
        let Some(s) = sessions.get(&SessionId::new("s-1")) else {
            panic!("fixture session missing");
        };

        let (init, init_slot) = completion();
        let mut effects = Effects::new(&sessions, &config, "");
        handler.add_session(s, init.register(), &mut effects);
        init.execute();
        let (_, subscribe) = effects.into_parts();

        let (teardown, teardown_slot) = completion();
        let mut effects = Effects::new(&sessions, &config, "");
        handler.remove_session(&SessionId::new("s-1"), teardown.register(), &mut effects);
        teardown.execute();
        assert!(effects.into_parts().1.is_empty(), "nothing to cancel before the grant");
        assert_eq!(outcome(&teardown_slot), Some(Ok(())));
        assert!(matches!(outcome(&init_slot), Some(Err(_))), "the waiting party is released");

        let ack = SubscribeAck { subscription_id: Some("aiv-late".into()), ..SubscribeAck::default() };
        let mut effects = Effects::new(&sessions, &config, "");
        handler.handle_subscribe_response(subscribe[0].envelope.request_id.as_ref(), ack, &mut effects);
        let (_, outbound) = effects.into_parts();
        match outbound.as_slice() {
            [cancel] => {
                assert_eq!(cancel.envelope.message_type, MessageType::AivUnsubscribeRequest);
                assert_eq!(cancel.envelope.message["subscriptionId"], "aiv-late");
            }
            other => panic!("expected one unsubscribe, got {other:?}"),
        }
        assert!(handler.registered_sessions().is_empty());
        assert!(handler.subscription_of(&SessionId::new("s-1")).is_none());

        let mut effects = Effects::new(&sessions, &config, "");
        let repeat = SubscribeAck { subscription_id: Some("aiv-late".into()), ..SubscribeAck::default() };
        handler.handle_subscribe_response(subscribe[0].envelope.request_id.as_ref(), repeat, &mut effects);
        assert!(effects.into_parts().1.is_empty(), "a request is cancelled only once");
    }
}
