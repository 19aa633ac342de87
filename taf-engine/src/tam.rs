//! Trust assessment manager.
//!
//! The single actor that owns sessions, client subscriptions and the
//! latest result set of every instance. It validates inbound envelopes,
//! routes evidence through the trust source manager, forwards V2X traffic
//! to the trust model manager and hands every resulting command to the
//! owning worker shard.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use taf_core::{
    AtlResultSet, ClientId, CompletionHandler, FullTmiId, NotifyTrigger, RequestId, SessionId, SubscriptionId,
    TrustModelInstance, Update,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::crypto::Crypto;
use crate::message::{
    Envelope, InitRequest, InitResponse, MessageType, Notify, StatusResponse, SubscribeRequest, SubscribeResponse,
    TaRequest, TaResponse, TmiResult, UnsubscribeRequest,
};
use crate::pool::WorkerPool;
use crate::session::{Reply, Session, SessionState, SessionTable};
use crate::sources::Effects;
use crate::tmm::TrustModelManager;
use crate::transport::{Outbound, Transport};
use crate::tsm::TrustSourceManager;
use crate::validator::{Inbound, SchemaValidator};
use crate::worker::{WorkerCommand, WorkerEvent};
use crate::EngineError;

/// Completion events fed back into the manager's own loop.
#[derive(Debug)]
pub enum Internal {
    InitSettled { session: SessionId, outcome: Result<(), EngineError> },
    TeardownSettled { session: SessionId },
}

#[derive(Debug, Clone)]
struct ClientSubscription {
    session: SessionId,
    /// Empty means every instance of the session.
    filter: BTreeSet<FullTmiId>,
    trigger: NotifyTrigger,
    topic: String,
}

impl ClientSubscription {
    fn covers(&self, tmi: &FullTmiId) -> bool {
        tmi.session == self.session && (self.filter.is_empty() || self.filter.contains(tmi))
    }
}

/// Receivers the manager's loop selects over.
pub struct Channels {
    pub inbound: mpsc::Receiver<Envelope>,
    pub internal: mpsc::UnboundedReceiver<Internal>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    pub shutdown: watch::Receiver<bool>,
}

pub struct TrustAssessmentManager {
    config: EngineConfig,
    sessions: SessionTable,
    tsm: TrustSourceManager,
    tmm: TrustModelManager,
    pool: WorkerPool,
    transport: Arc<dyn Transport>,
    crypto: Box<dyn Crypto>,
    validator: Box<dyn SchemaValidator>,
    internal: mpsc::UnboundedSender<Internal>,
    subscriptions: BTreeMap<SubscriptionId, ClientSubscription>,
    latest: BTreeMap<FullTmiId, AtlResultSet>,
}

impl TrustAssessmentManager {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        tmm: TrustModelManager,
        pool: WorkerPool,
        transport: Arc<dyn Transport>,
        crypto: Box<dyn Crypto>,
        validator: Box<dyn SchemaValidator>,
        internal: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        Self {
            config,
            sessions: SessionTable::new(),
            tsm: TrustSourceManager::new(),
            tmm,
            pool,
            transport,
            crypto,
            validator,
            internal,
            subscriptions: BTreeMap::new(),
            latest: BTreeMap::new(),
        }
    }

    /// Runs until the inbound channel closes or shutdown is signalled, then
    /// drains queued envelopes and worker results before returning.
    pub async fn run(mut self, mut channels: Channels) {
        let mut tick = tokio::time::interval(self.config.v2x.check_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(identifier = %self.config.identifier, shards = self.pool.shard_count(), "assessment manager started");

        loop {
            tokio::select! {
                biased;
                Some(event) = channels.internal.recv() => self.on_internal(event).await,
                Some(event) = channels.events.recv() => self.on_worker_event(event).await,
                message = channels.inbound.recv() => match message {
                    Some(envelope) => self.on_envelope(envelope).await,
                    None => break,
                },
                _ = tick.tick() => self.on_tick().await,
                changed = channels.shutdown.changed() => {
                    if changed.is_err() || *channels.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("assessment manager draining");
        channels.inbound.close();
        while let Some(envelope) = channels.inbound.recv().await {
            self.on_envelope(envelope).await;
        }
        while let Ok(event) = channels.internal.try_recv() {
            self.on_internal(event).await;
        }
        self.pool.shutdown().await;
        while let Ok(event) = channels.events.try_recv() {
            self.on_worker_event(event).await;
        }
        tracing::info!(sessions = self.sessions.len(), "assessment manager stopped");
    }

    // ── Inbound ───────────────────────────────────────────────────────

    pub async fn on_envelope(&mut self, envelope: Envelope) {
        match self.crypto.verify(&envelope) {
            Ok(true) => {}
            Ok(false) if self.config.crypto.ignore_verification_results => {
                tracing::debug!(message_type = %envelope.message_type, sender = %envelope.sender, "ignoring failed verification");
            }
            Ok(false) => {
                tracing::warn!(message_type = %envelope.message_type, sender = %envelope.sender, "signature verification failed, discarding message");
                return;
            }
            Err(e) => {
                tracing::warn!(message_type = %envelope.message_type, error = %e, "could not verify message, discarding");
                return;
            }
        }
        let inbound = match self.validator.validate(&envelope) {
            Ok(inbound) => inbound,
            Err(diagnostics) => {
                tracing::warn!(sender = %envelope.sender, %diagnostics, "discarding invalid message");
                return;
            }
        };
        let reply =
            envelope.response_topic.clone().map(|topic| Reply { topic, request_id: envelope.request_id.clone() });

        let mut effects = Effects::new(&self.sessions, &self.config, self.crypto.attestation_certificate());
        let unhandled = self.tsm.handle(inbound, envelope.request_id.as_ref(), &mut effects);
        let (dispatches, outbound) = effects.into_parts();
        self.apply(dispatches, outbound).await;
        let Some(inbound) = unhandled else {
            return;
        };

        match inbound {
            Inbound::Init(request) => self.init(request, &envelope.sender, reply).await,
            Inbound::Teardown(request) => self.teardown(request.session_id, reply).await,
            Inbound::Ta(request) => self.assessment(request, reply.as_ref()).await,
            Inbound::Subscribe(request) => self.subscribe(request, reply.as_ref()).await,
            Inbound::Unsubscribe(request) => self.unsubscribe(&request, reply.as_ref()).await,
            Inbound::TmtDiscover => {
                let offer = self.tmm.offer();
                self.respond(reply.as_ref(), MessageType::TasTmtOffer, &offer).await;
            }
            Inbound::V2xCpm(cpm) => {
                let commands = self.tmm.handle_cpm(&cpm, &mut self.sessions, Instant::now());
                self.execute(commands).await;
            }
            other => tracing::warn!(message = ?other, "message not routed"),
        }
    }

    // ── Session lifecycle ─────────────────────────────────────────────

    async fn init(&mut self, request: InitRequest, client: &str, reply: Option<Reply>) {
        let session_id = match &self.config.debug.fixed_session_id {
            Some(fixed) => SessionId::new(fixed.as_str()),
            None => SessionId::generate(),
        };
        let (mut session, instance) = match self.create_session(&session_id, &request, client) {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(template = %request.trust_model_template, error = %e, "session init refused");
                let response = InitResponse { success: false, session_id: None, error: Some(e.to_string()) };
                self.respond(reply.as_ref(), MessageType::TasInitResponse, &response).await;
                return;
            }
        };
        if let Some(reply) = reply {
            session.set_init_reply(reply);
        }
        let static_init = instance.map(|instance| WorkerCommand::Init {
            tmi: session.add_tmi(instance.id().clone()),
            instance,
            params: session.params().clone(),
        });
        tracing::info!(session = %session_id, template = %request.trust_model_template, %client, "session initializing");
        self.sessions.insert(session_id.clone(), session);
        self.execute(static_init).await;

        let resolved = self.internal.clone();
        let rejected = self.internal.clone();
        let (on_resolve, on_reject) = (session_id.clone(), session_id.clone());
        let barrier = CompletionHandler::new(
            move || {
                if resolved.send(Internal::InitSettled { session: on_resolve, outcome: Ok(()) }).is_err() {
                    tracing::debug!("assessment manager gone before init settled");
                }
            },
            move |error| {
                if rejected.send(Internal::InitSettled { session: on_reject, outcome: Err(error) }).is_err() {
                    tracing::debug!("assessment manager gone before init settled");
                }
            },
        );
        let mut effects = Effects::new(&self.sessions, &self.config, self.crypto.attestation_certificate());
        if let Some(session) = self.sessions.get(&session_id) {
            self.tsm.add_session(session, &barrier, &mut effects);
        }
        barrier.execute();
        let (dispatches, outbound) = effects.into_parts();
        self.apply(dispatches, outbound).await;
    }

    fn create_session(
        &self,
        session_id: &SessionId,
        request: &InitRequest,
        client: &str,
    ) -> Result<(Session, Option<Box<dyn TrustModelInstance>>), EngineError> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Err(EngineError::SessionState { session: session_id.clone(), state: existing.state() });
        }
        let template = self.tmm.resolve(&request.trust_model_template)?;
        let spawned = template.spawn(&request.params)?;
        let session = Session::new(
            session_id.clone(),
            ClientId::new(client),
            template,
            request.params.clone(),
            spawned.quantifiers,
            spawned.spawner,
        );
        Ok((session, spawned.instance))
    }

    async fn teardown(&mut self, session_id: SessionId, reply: Option<Reply>) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            let error = EngineError::SessionNotFound(session_id);
            self.respond(reply.as_ref(), MessageType::TasTeardownResponse, &StatusResponse::failed(error)).await;
            return;
        };
        let was_initializing = session.state() == SessionState::Initializing;
        if let Err(e) = session.begin_teardown(reply.clone()) {
            self.respond(reply.as_ref(), MessageType::TasTeardownResponse, &StatusResponse::failed(e)).await;
            return;
        }
        if was_initializing {
            tracing::info!(session = %session_id, "teardown deferred until initialization settles");
            return;
        }
        tracing::info!(session = %session_id, "session tearing down");
        self.release(&session_id).await;
    }

    /// Destroys the instances of a session in `TearingDown` and
    /// unregisters it from its trust sources.
    async fn release(&mut self, session_id: &SessionId) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let removals: Vec<WorkerCommand> =
            session.drain_tmis().into_iter().map(|tmi| WorkerCommand::Remove { tmi }).collect();
        let sources = session.trust_sources();
        self.subscriptions.retain(|_, subscription| subscription.session != *session_id);
        self.execute(removals).await;

        let resolved = self.internal.clone();
        let rejected = self.internal.clone();
        let (on_resolve, on_reject) = (session_id.clone(), session_id.clone());
        let barrier = CompletionHandler::new(
            move || {
                if resolved.send(Internal::TeardownSettled { session: on_resolve }).is_err() {
                    tracing::debug!("assessment manager gone before teardown settled");
                }
            },
            move |error: EngineError| {
                tracing::warn!(session = %on_reject, %error, "trust source unregistration failed");
                if rejected.send(Internal::TeardownSettled { session: on_reject }).is_err() {
                    tracing::debug!("assessment manager gone before teardown settled");
                }
            },
        );
        let mut effects = Effects::new(&self.sessions, &self.config, self.crypto.attestation_certificate());
        self.tsm.remove_session(session_id, &sources, &barrier, &mut effects);
        barrier.execute();
        let (dispatches, outbound) = effects.into_parts();
        self.apply(dispatches, outbound).await;
    }

    async fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::InitSettled { session, outcome } => self.init_settled(session, outcome).await,
            Internal::TeardownSettled { session } => {
                let Some(mut removed) = self.sessions.remove(&session) else {
                    return;
                };
                if let Err(e) = removed.finish_teardown() {
                    tracing::warn!(%session, error = %e, "unexpected teardown completion");
                }
                tracing::info!(%session, "session torn down");
                let reply = removed.take_teardown_reply();
                self.respond(reply.as_ref(), MessageType::TasTeardownResponse, &StatusResponse::ok()).await;
            }
        }
    }

    async fn init_settled(&mut self, session_id: SessionId, outcome: Result<(), EngineError>) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let reply = session.take_init_reply();
        let failure = match outcome {
            Ok(()) => match session.establish() {
                Ok(()) => {
                    tracing::info!(session = %session_id, "session established");
                    let response = InitResponse { success: true, session_id: Some(session_id), error: None };
                    self.respond(reply.as_ref(), MessageType::TasInitResponse, &response).await;
                    return;
                }
                Err(e) => e,
            },
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "session init failed");
                if session.state() == SessionState::Initializing {
                    if let Err(state) = session.begin_teardown(None) {
                        tracing::warn!(session = %session_id, error = %state, "cannot tear down failed session");
                    }
                }
                e
            }
        };
        self.release(&session_id).await;
        let response = InitResponse { success: false, session_id: Some(session_id), error: Some(failure.to_string()) };
        self.respond(reply.as_ref(), MessageType::TasInitResponse, &response).await;
    }

    // ── Client queries ────────────────────────────────────────────────

    async fn assessment(&mut self, request: TaRequest, reply: Option<&Reply>) {
        let response = match self.sessions.get(&request.session_id) {
            Some(session) => TaResponse {
                results: session
                    .tmis()
                    .filter(|tmi| request.filter.is_empty() || request.filter.contains(tmi))
                    .filter_map(|tmi| self.latest.get(tmi))
                    .map(TmiResult::from)
                    .collect(),
                session_id: request.session_id,
                error: None,
            },
            None => TaResponse {
                error: Some(EngineError::SessionNotFound(request.session_id.clone()).to_string()),
                session_id: request.session_id,
                results: Vec::new(),
            },
        };
        self.respond(reply, MessageType::TasTaResponse, &response).await;
    }

    async fn subscribe(&mut self, request: SubscribeRequest, reply: Option<&Reply>) {
        let refusal = match self.sessions.get(&request.session_id) {
            None => Some(EngineError::SessionNotFound(request.session_id.clone())),
            Some(session) if !session.accepts_updates() => {
                Some(EngineError::SessionState { session: request.session_id.clone(), state: session.state() })
            }
            Some(_) => None,
        };
        let (Some(reply), None) = (reply, &refusal) else {
            let error = refusal.map_or_else(|| "no response topic".to_owned(), |e| e.to_string());
            let response = SubscribeResponse { success: false, subscription_id: None, error: Some(error) };
            self.respond(reply, MessageType::TasSubscribeResponse, &response).await;
            return;
        };
        let subscription_id = match &self.config.debug.fixed_subscription_id {
            Some(fixed) => SubscriptionId::new(fixed.as_str()),
            None => SubscriptionId::generate(),
        };
        let subscription = ClientSubscription {
            session: request.session_id,
            filter: request.filter.into_iter().collect(),
            trigger: request.trigger,
            topic: reply.topic.clone(),
        };
        tracing::info!(session = %subscription.session, subscription = %subscription_id, trigger = ?subscription.trigger, "client subscribed");
        self.subscriptions.insert(subscription_id.clone(), subscription);
        let response = SubscribeResponse { success: true, subscription_id: Some(subscription_id), error: None };
        self.respond(Some(reply), MessageType::TasSubscribeResponse, &response).await;
    }

    async fn unsubscribe(&mut self, request: &UnsubscribeRequest, reply: Option<&Reply>) {
        let owned = self
            .subscriptions
            .get(&request.subscription_id)
            .is_some_and(|subscription| subscription.session == request.session_id);
        let response = if owned {
            self.subscriptions.remove(&request.subscription_id);
            tracing::info!(session = %request.session_id, subscription = %request.subscription_id, "client unsubscribed");
            StatusResponse::ok()
        } else {
            StatusResponse::failed(format!("unknown subscription {}", request.subscription_id))
        };
        self.respond(reply, MessageType::TasUnsubscribeResponse, &response).await;
    }

    // ── Worker results ────────────────────────────────────────────────

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::AtlUpdated(results) => self.atl_updated(results).await,
            WorkerEvent::FusionFailed { tmi, error } => {
                tracing::warn!(%tmi, %error, "no result for instance");
            }
        }
    }

    async fn atl_updated(&mut self, results: AtlResultSet) {
        let tmi = results.tmi().clone();
        let live = self.sessions.get(&tmi.session).is_some_and(|session| session.has_tmi(&tmi.tmi));
        if !live {
            tracing::debug!(%tmi, "result for removed instance");
            return;
        }
        let previous = self.latest.get(&tmi);
        let mut notifications = Vec::new();
        for (subscription_id, subscription) in &self.subscriptions {
            if subscription.covers(&tmi) && results.changed_since(previous, subscription.trigger) {
                let notify = Notify {
                    session_id: subscription.session.clone(),
                    subscription_id: subscription_id.clone(),
                    updates: vec![TmiResult::from(&results)],
                };
                notifications.push((subscription.topic.clone(), notify));
            }
        }
        tracing::debug!(%tmi, version = results.version(), notified = notifications.len(), "result set updated");
        self.latest.insert(tmi, results);
        for (topic, notify) in notifications {
            self.publish(topic, MessageType::TasNotify, None, &notify).await;
        }
    }

    async fn on_tick(&mut self) {
        let commands = self.tmm.expire_idle(&mut self.sessions, Instant::now());
        self.execute(commands).await;
    }

    // ── Effects ───────────────────────────────────────────────────────

    async fn apply(&mut self, dispatches: Vec<(SessionId, Vec<Update>)>, outbound: Vec<Outbound>) {
        for (session, updates) in dispatches {
            self.dispatch_updates(&session, updates).await;
        }
        for Outbound { topic, envelope } in outbound {
            self.send(topic, envelope).await;
        }
    }

    /// Offers every update to every instance of the session; instances
    /// ignore what does not concern them.
    async fn dispatch_updates(&mut self, session_id: &SessionId, updates: Vec<Update>) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        if !session.accepts_updates() {
            tracing::debug!(session = %session_id, state = %session.state(), "dropping updates");
            return;
        }
        let tmis: Vec<FullTmiId> = session.tmis().cloned().collect();
        let mut commands = Vec::with_capacity(tmis.len() * updates.len());
        for update in &updates {
            for tmi in &tmis {
                commands.push(WorkerCommand::Update { tmi: tmi.clone(), update: update.clone() });
            }
        }
        self.execute(commands).await;
    }

    async fn execute(&mut self, commands: impl IntoIterator<Item = WorkerCommand>) {
        for command in commands {
            if let WorkerCommand::Remove { tmi } = &command {
                self.latest.remove(tmi);
            }
            let tmi = command.tmi().clone();
            if let Err(e) = self.pool.dispatch(command).await {
                tracing::error!(%tmi, error = %e, "could not dispatch to worker");
            }
        }
    }

    async fn respond(&self, reply: Option<&Reply>, message_type: MessageType, payload: &impl Serialize) {
        let Some(reply) = reply else {
            tracing::debug!(%message_type, "no response topic, dropping response");
            return;
        };
        self.publish(reply.topic.clone(), message_type, reply.request_id.clone(), payload).await;
    }

    async fn publish(
        &self,
        topic: String,
        message_type: MessageType,
        request_id: Option<RequestId>,
        payload: &impl Serialize,
    ) {
        match Envelope::new(message_type, self.config.identifier.clone(), payload) {
            Ok(envelope) => self.send(topic, envelope.with_request_id(request_id)).await,
            Err(e) => tracing::error!(%message_type, error = %e, "could not encode message"),
        }
    }

    async fn send(&self, topic: String, mut envelope: Envelope) {
        if let Err(e) = self.crypto.sign(&mut envelope) {
            tracing::error!(message_type = %envelope.message_type, error = %e, "could not sign message");
            return;
        }
        let message_type = envelope.message_type;
        if let Err(e) = self.transport.send(&topic, envelope).await {
            tracing::warn!(%topic, %message_type, error = %e, "could not deliver message");
        }
    }
}
