//! Peer opinions relayed by the network trust module.

use std::collections::BTreeSet;

use taf_core::{
    CompletionParty, EvidenceMap, EvidenceType, EvidenceValue, SessionId, SubjectiveOpinion, TrustSource,
};

use super::{quantify, trustee_of_kind, TamAccess, TrustSourceHandler};
use crate::message::{RawOpinion, V2xNtm};
use crate::session::Session;
use crate::EngineError;

#[derive(Debug, Default)]
pub struct NtmHandler {
    sessions: BTreeSet<SessionId>,
}

impl NtmHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn opinion(raw: RawOpinion) -> Result<SubjectiveOpinion, taf_core::CoreError> {
        SubjectiveOpinion::new(raw.belief, raw.disbelief, raw.uncertainty, raw.base_rate)
    }
}

impl TrustSourceHandler for NtmHandler {
    type Notify = V2xNtm;

    fn trust_source(&self) -> TrustSource {
        TrustSource::Ntm
    }

    fn add_session(&mut self, session: &Session, party: CompletionParty<EngineError>, _access: &mut dyn TamAccess) {
        self.sessions.insert(session.id().clone());
        party.resolve();
    }

    fn remove_session(&mut self, session: &SessionId, party: CompletionParty<EngineError>, _access: &mut dyn TamAccess) {
        self.sessions.remove(session);
        party.resolve();
    }

    fn handle_notify(&mut self, notify: V2xNtm, access: &mut dyn TamAccess) {
        let entries = notify.v2x_source_set.unwrap_or_default();
        if entries.is_empty() {
            tracing::info!("V2X_NTM without opinions, ignoring");
            return;
        }
        let mut opinions = Vec::with_capacity(entries.len());
        for entry in entries {
            match Self::opinion(entry.opinion) {
                Ok(opinion) => opinions.push((entry.v2x_source_id.to_string(), opinion)),
                Err(e) => tracing::warn!(source = entry.v2x_source_id, error = %e, "skipping invalid remote opinion"),
            }
        }

        for session_id in &self.sessions {
            let Some(session) = access.session(session_id) else {
                continue;
            };
            let mut updates = Vec::new();
            for (source, opinion) in &opinions {
                let evidence = EvidenceMap::from([(EvidenceType::RemoteOpinion, EvidenceValue::Opinion(*opinion))]);
                for quantifier in session.quantifiers_for(TrustSource::Ntm) {
                    if let Some(trustee) = trustee_of_kind(quantifier, &[source.as_str()]) {
                        updates.extend(quantify(session_id, quantifier, trustee, &evidence));
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taf_core::{Params, TrustModelTemplate, Update};
    use taf_models::{ImaStandalone, NtmStandalone};

    use super::*;
    use crate::config::EngineConfig;
    use crate::message::NtmEntry;
    use crate::session::SessionTable;
    use crate::sources::testing::{completion, session};
    use crate::sources::Effects;

    fn table(template: Arc<dyn TrustModelTemplate>) -> SessionTable {
        let s = session("s-1", &template, &Params::new());
        SessionTable::from([(s.id().clone(), s)])
    }

    fn register(handler: &mut NtmHandler, table: &SessionTable, config: &EngineConfig) {
        let mut effects = Effects::new(table, config, "");
        for s in table.values() {
            let (barrier, _slot) = completion();
            handler.add_session(s, barrier.register(), &mut effects);
            barrier.execute();
        }
    }

    fn entry(id: i64, belief: f64, disbelief: f64, uncertainty: f64) -> NtmEntry {
        NtmEntry { v2x_source_id: id, opinion: RawOpinion { belief, disbelief, uncertainty, base_rate: 0.5 } }
    }

    #[test]
    fn valid_opinions_pass_through_and_invalid_ones_are_skipped() {
        let config = EngineConfig::default();
        let table = table(Arc::new(NtmStandalone));
        let mut handler = NtmHandler::new();
        register(&mut handler, &table, &config);

        let notify = V2xNtm { v2x_source_set: Some(vec![entry(7, 0.6, 0.1, 0.3), entry(8, 0.9, 0.9, 0.9)]) };
        let mut effects = Effects::new(&table, &config, "");
        handler.handle_notify(notify, &mut effects);
        let (dispatches, _) = effects.into_parts();
        match dispatches.first().map(|(_, updates)| updates.as_slice()) {
            Some([Update::AtomicTrustOpinion { trustee, opinion, source, .. }]) => {
                assert_eq!(trustee.to_string(), "vehicle_7");
                assert_eq!(*source, TrustSource::Ntm);
                assert!((opinion.belief() - 0.6).abs() < 1e-12);
            }
            other => panic!("expected one relayed opinion, got {other:?}"),
        }
    }

    #[test]
    fn empty_or_missing_set_is_ignored() {
        let config = EngineConfig::default();
        let table = table(Arc::new(NtmStandalone));
        let mut handler = NtmHandler::new();
        register(&mut handler, &table, &config);
        let mut effects = Effects::new(&table, &config, "");
        handler.handle_notify(V2xNtm { v2x_source_set: None }, &mut effects);
        handler.handle_notify(V2xNtm { v2x_source_set: Some(Vec::new()) }, &mut effects);
        assert!(effects.into_parts().0.is_empty());
    }

    #[test]
    fn sessions_without_peer_quantifiers_get_nothing() {
        let config = EngineConfig::default();
        let table = table(Arc::new(ImaStandalone));
        let mut handler = NtmHandler::new();
        register(&mut handler, &table, &config);
        let mut effects = Effects::new(&table, &config, "");
        handler.handle_notify(V2xNtm { v2x_source_set: Some(vec![entry(7, 0.6, 0.1, 0.3)]) }, &mut effects);
        assert!(effects.into_parts().0.is_empty());
    }
}
