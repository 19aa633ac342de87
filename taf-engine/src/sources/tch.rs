//! Trust-chain reports pushed by the trusted computing hub.
//!
//! The hub needs no subscription: registering a session only adds it to
//! the set of sessions reports fan out to.

use std::collections::BTreeSet;

use taf_core::{CompletionParty, EvidenceMap, EvidenceType, EvidenceValue, SessionId, TrustSource};

use super::{quantify, trustee_of_kind, TamAccess, TrustSourceHandler};
use crate::message::TchNotify;
use crate::session::Session;
use crate::EngineError;

#[derive(Debug, Default)]
pub struct TchHandler {
    sessions: BTreeSet<SessionId>,
}

impl TchHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustSourceHandler for TchHandler {
    type Notify = TchNotify;

    fn trust_source(&self) -> TrustSource {
        TrustSource::Tch
    }

    fn add_session(&mut self, session: &Session, party: CompletionParty<EngineError>, _access: &mut dyn TamAccess) {
        self.sessions.insert(session.id().clone());
        party.resolve();
    }

    fn remove_session(&mut self, session: &SessionId, party: CompletionParty<EngineError>, _access: &mut dyn TamAccess) {
        self.sessions.remove(session);
        party.resolve();
    }

    fn handle_notify(&mut self, notify: TchNotify, access: &mut dyn TamAccess) {
        let vehicle = notify.tch_report.trustee_id;
        let mut reported = Vec::new();
        for report in notify.tch_report.trustee_reports {
            let mut key = vec![vehicle.clone()];
            key.extend(report.component_id);
            let mut readings = EvidenceMap::new();
            for claim in report.attestation_report {
                match EvidenceType::by_source_and_name(TrustSource::Tch, &claim.claim) {
                    Ok(evidence) => {
                        readings.insert(evidence, EvidenceValue::Appraisal(claim.appraisal.into()));
                    }
                    Err(e) => tracing::warn!(%vehicle, error = %e, "ignoring unknown claim"),
                }
            }
            reported.push((key, readings));
        }
        if reported.is_empty() {
            tracing::debug!(%vehicle, "TCH report without trustee reports");
            return;
        }

        for session_id in &self.sessions {
            let Some(session) = access.session(session_id) else {
                continue;
            };
            let mut updates = Vec::new();
            for (key, evidence) in &reported {
                let segments: Vec<&str> = key.iter().map(String::as_str).collect();
                for quantifier in session.quantifiers_for(TrustSource::Tch) {
                    if let Some(trustee) = trustee_of_kind(quantifier, &segments) {
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
