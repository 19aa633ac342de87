//! Client sessions.
//!
//! A session binds one client to one template instantiation: the instances
//! it owns, the quantifiers its evidence runs through and the spawner that
//! adds instances as vehicles appear.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use taf_core::{
    ClientId, DynamicSpawner, FullTmiId, Params, RequestId, SessionId, TmiId, TrustModelTemplate, TrustSource,
    TrustSourceQuantifier,
};

use crate::EngineError;

/// Lifecycle of a session.
///
/// `Initializing` lasts until every trust source subscription settled.
/// A teardown that arrives earlier moves the session to `TearingDown`
/// right away and is answered once initialization settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Established,
    TearingDown,
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Initializing => "initializing",
            Self::Established => "established",
            Self::TearingDown => "tearing down",
            Self::TornDown => "torn down",
        };
        f.write_str(text)
    }
}

/// Where and how to answer a client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub topic: String,
    pub request_id: Option<RequestId>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    client: ClientId,
    template: Arc<dyn TrustModelTemplate>,
    state: SessionState,
    params: Params,
    quantifiers: Vec<TrustSourceQuantifier>,
    spawner: Option<Arc<dyn DynamicSpawner>>,
    tmis: BTreeMap<TmiId, FullTmiId>,
    /// Instances spawned on behalf of an observed vehicle.
    dynamic: BTreeMap<String, BTreeSet<TmiId>>,
    init_reply: Option<Reply>,
    teardown_reply: Option<Reply>,
}

/// Sessions by id; mutated only by the assessment manager.
pub type SessionTable = BTreeMap<SessionId, Session>;

impl Session {
    #[must_use]
    pub fn new(
        id: SessionId,
        client: ClientId,
        template: Arc<dyn TrustModelTemplate>,
        params: Params,
        quantifiers: Vec<TrustSourceQuantifier>,
        spawner: Option<Arc<dyn DynamicSpawner>>,
    ) -> Self {
        Self {
            id,
            client,
            template,
            state: SessionState::Initializing,
            params,
            quantifiers,
            spawner,
            tmis: BTreeMap::new(),
            dynamic: BTreeMap::new(),
            init_reply: None,
            teardown_reply: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    #[must_use]
    pub fn template(&self) -> &Arc<dyn TrustModelTemplate> {
        &self.template
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn quantifiers(&self) -> &[TrustSourceQuantifier] {
        &self.quantifiers
    }

    pub fn quantifiers_for(&self, source: TrustSource) -> impl Iterator<Item = &TrustSourceQuantifier> {
        self.quantifiers.iter().filter(move |q| q.source == source)
    }

    #[must_use]
    pub fn spawner(&self) -> Option<&Arc<dyn DynamicSpawner>> {
        self.spawner.as_ref()
    }

    /// Sources this session needs subscriptions for.
    #[must_use]
    pub fn trust_sources(&self) -> BTreeSet<TrustSource> {
        let mut sources = self.template.trust_sources();
        sources.extend(self.quantifiers.iter().map(|q| q.source));
        sources
    }

    /// Instance ids owned by this session.
    pub fn tmis(&self) -> impl Iterator<Item = &FullTmiId> {
        self.tmis.values()
    }

    #[must_use]
    pub fn has_tmi(&self, tmi: &TmiId) -> bool {
        self.tmis.contains_key(tmi)
    }

    /// Registers an instance and returns its full id.
    pub fn add_tmi(&mut self, tmi: TmiId) -> FullTmiId {
        let full = FullTmiId::new(self.client.clone(), self.id.clone(), self.template.identifier(), tmi.clone());
        self.tmis.insert(tmi, full.clone());
        full
    }

    /// Registers an instance spawned for `vehicle`.
    pub fn add_dynamic_tmi(&mut self, vehicle: &str, tmi: TmiId) -> FullTmiId {
        self.dynamic.entry(vehicle.to_owned()).or_default().insert(tmi.clone());
        self.add_tmi(tmi)
    }

    #[must_use]
    pub fn knows_vehicle(&self, vehicle: &str) -> bool {
        self.dynamic.contains_key(vehicle)
    }

    /// Forgets every instance spawned for `vehicle`.
    pub fn remove_vehicle(&mut self, vehicle: &str) -> Vec<FullTmiId> {
        let Some(tmis) = self.dynamic.remove(vehicle) else {
            return Vec::new();
        };
        tmis.iter().filter_map(|tmi| self.tmis.remove(tmi)).collect()
    }

    /// Forgets every instance.
    pub fn drain_tmis(&mut self) -> Vec<FullTmiId> {
        self.dynamic.clear();
        std::mem::take(&mut self.tmis).into_values().collect()
    }

    /// Whether evidence may still reach this session's instances.
    #[must_use]
    pub fn accepts_updates(&self) -> bool {
        matches!(self.state, SessionState::Initializing | SessionState::Established)
    }

    pub fn set_init_reply(&mut self, reply: Reply) {
        self.init_reply = Some(reply);
    }

    pub fn take_init_reply(&mut self) -> Option<Reply> {
        self.init_reply.take()
    }

    pub fn take_teardown_reply(&mut self) -> Option<Reply> {
        self.teardown_reply.take()
    }

    /// `Initializing → Established`.
    ///
    /// # Errors
    /// Returns [`EngineError::SessionState`] from any other state.
    pub fn establish(&mut self) -> Result<(), EngineError> {
        self.transition(SessionState::Initializing, SessionState::Established)
    }

    /// Marks the session as going away; `reply` is answered once it is gone.
    ///
    /// # Errors
    /// Returns [`EngineError::SessionState`] if a teardown is already running.
    pub fn begin_teardown(&mut self, reply: Option<Reply>) -> Result<(), EngineError> {
        match self.state {
            SessionState::Initializing | SessionState::Established => {
                self.state = SessionState::TearingDown;
                self.teardown_reply = reply;
                Ok(())
            }
            SessionState::TearingDown | SessionState::TornDown => Err(self.state_error()),
        }
    }

    /// `TearingDown → TornDown`.
    ///
    /// # Errors
    /// Returns [`EngineError::SessionState`] from any other state.
    pub fn finish_teardown(&mut self) -> Result<(), EngineError> {
        self.transition(SessionState::TearingDown, SessionState::TornDown)
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<(), EngineError> {
        if self.state != from {
            return Err(self.state_error());
        }
        self.state = to;
        Ok(())
    }

    fn state_error(&self) -> EngineError {
        EngineError::SessionState { session: self.id.clone(), state: self.state }
    }
}

#[cfg(test)]
mod tests {
    use taf_models::VehicleComputerMigration;

    use super::*;

    fn session() -> Session {
        Session::new(
            SessionId::new("s-1"),
            ClientId::new("client"),
            Arc::new(VehicleComputerMigration),
            Params::new(),
            Vec::new(),
            None,
        )
    }

    #[test]
    fn new_session_is_initializing_and_accepts_updates() {
        let s = session();
        assert_eq!(s.state(), SessionState::Initializing);
        assert!(s.accepts_updates());
        assert!(s.trust_sources().contains(&TrustSource::Aiv));
    }

    #[test]
    fn full_tmi_id_carries_session_and_template() {
        let mut s = session();
        let full = s.add_tmi(TmiId::new("VCM"));
        assert_eq!(full.session, SessionId::new("s-1"));
        assert_eq!(full.template, "VCM@0.0.1");
        assert!(s.has_tmi(&TmiId::new("VCM")));
    }

    #[test]
    fn teardown_during_init_stops_updates() {
        let mut s = session();
        assert!(s.begin_teardown(None).is_ok());
        assert!(!s.accepts_updates());
        assert!(matches!(s.establish(), Err(EngineError::SessionState { .. })));
        assert!(s.begin_teardown(None).is_err(), "second teardown must be refused");
        assert!(s.finish_teardown().is_ok());
        assert_eq!(s.state(), SessionState::TornDown);
    }

    #[test]
    fn removing_a_vehicle_drops_only_its_instances() {
        let mut s = session();
        s.add_tmi(TmiId::new("VCM"));
        s.add_dynamic_tmi("5", TmiId::new("V_5"));
        s.add_dynamic_tmi("7", TmiId::new("V_7"));
        assert!(s.knows_vehicle("5"));
        let removed = s.remove_vehicle("5");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].tmi, TmiId::new("V_5"));
        assert!(!s.knows_vehicle("5"));
        assert_eq!(s.tmis().count(), 2);
        assert_eq!(s.drain_tmis().len(), 2);
        assert_eq!(s.tmis().count(), 0);
    }
}
