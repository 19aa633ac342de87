//! Trust source manager: owns one handler per evidence source and fans
//! session registration out to the sources a session needs.

use std::collections::BTreeSet;

use taf_core::{CompletionHandler, RequestId, SessionId, TrustSource};

use crate::session::Session;
use crate::sources::{AivHandler, MbdHandler, NtmHandler, TamAccess, TchHandler, TrustSourceHandler};
use crate::validator::Inbound;
use crate::EngineError;

#[derive(Default)]
pub struct TrustSourceManager {
    aiv: AivHandler,
    mbd: MbdHandler,
    tch: TchHandler,
    ntm: NtmHandler,
}

impl TrustSourceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` with every source it consumes; each source adds
    /// one party to `barrier`.
    pub fn add_session(&mut self, session: &Session, barrier: &CompletionHandler<EngineError>, access: &mut dyn TamAccess) {
        for source in session.trust_sources() {
            tracing::debug!(session = %session.id(), %source, "registering with trust source");
            let party = barrier.register();
            match source {
                TrustSource::Aiv => self.aiv.add_session(session, party, access),
                TrustSource::Mbd => self.mbd.add_session(session, party, access),
                TrustSource::Tch => self.tch.add_session(session, party, access),
                TrustSource::Ntm => self.ntm.add_session(session, party, access),
            }
        }
    }

    /// Unregisters `session` from `sources`; each adds one party to `barrier`.
    pub fn remove_session(
        &mut self,
        session: &SessionId,
        sources: &BTreeSet<TrustSource>,
        barrier: &CompletionHandler<EngineError>,
        access: &mut dyn TamAccess,
    ) {
        for source in sources {
            tracing::debug!(%session, %source, "unregistering from trust source");
            let party = barrier.register();
            match source {
                TrustSource::Aiv => self.aiv.remove_session(session, party, access),
                TrustSource::Mbd => self.mbd.remove_session(session, party, access),
                TrustSource::Tch => self.tch.remove_session(session, party, access),
                TrustSource::Ntm => self.ntm.remove_session(session, party, access),
            }
        }
    }

    /// Routes a trust source message to its handler. Anything else is
    /// handed back unchanged.
    pub fn handle(&mut self, inbound: Inbound, request_id: Option<&RequestId>, access: &mut dyn TamAccess) -> Option<Inbound> {
        match inbound {
            Inbound::AivSubscribeResponse(ack) => self.aiv.handle_subscribe_response(request_id, ack, access),
            Inbound::AivUnsubscribeResponse(ack) => self.aiv.handle_unsubscribe_response(&ack),
            Inbound::AivNotify(notify) => self.aiv.handle_notify(notify, access),
            Inbound::MbdSubscribeResponse(ack) => self.mbd.handle_subscribe_response(request_id, ack, access),
            Inbound::MbdUnsubscribeResponse(ack) => self.mbd.handle_unsubscribe_response(&ack),
            Inbound::MbdNotify(notify) => self.mbd.handle_notify(notify, access),
            Inbound::TchNotify(notify) => self.tch.handle_notify(notify, access),
            Inbound::V2xNtm(notify) => self.ntm.handle_notify(notify, access),
            other => return Some(other),
        }
        None
    }

    /// Sessions currently registered with `source`.
    #[must_use]
    pub fn registered_sessions(&self, source: TrustSource) -> Vec<SessionId> {
        match source {
            TrustSource::Aiv => self.aiv.registered_sessions(),
            TrustSource::Mbd => self.mbd.registered_sessions(),
            TrustSource::Tch => self.tch.registered_sessions(),
            TrustSource::Ntm => self.ntm.registered_sessions(),
        }
    }
}
