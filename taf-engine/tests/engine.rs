//! End-to-end tests driving the engine through the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use taf_core::TemplateRegistry;
use taf_engine::{ChannelTransport, EngineConfig, EngineHandle, Envelope, MessageType, Outbound};
use tokio::sync::mpsc;

const CLIENT_TOPIC: &str = "client";

struct Harness {
    engine: EngineHandle,
    outbound: mpsc::Receiver<Outbound>,
}

impl Harness {
    fn start(config: EngineConfig) -> Self {
        let (transport, outbound) = ChannelTransport::new(256);
        let mut registry = TemplateRegistry::new();
        taf_models::register_builtin(&mut registry);
        match EngineHandle::start(config, registry, Arc::new(transport)) {
            Ok(engine) => Self { engine, outbound },
            Err(e) => panic!("engine failed to start: {e}"),
        }
    }

    async fn send(&self, message_type: MessageType, payload: Value, request_id: Option<&str>) {
        let envelope = match Envelope::new(message_type, "client-1", &payload) {
            Ok(envelope) => envelope,
            Err(e) => panic!("cannot encode payload: {e}"),
        };
        let envelope = envelope.with_request_id(request_id.map(Into::into));
        let envelope = if message_type.expects_response() { envelope.with_response_topic(CLIENT_TOPIC) } else { envelope };
        if let Err(e) = self.engine.submit(envelope).await {
            panic!("submit failed: {e}");
        }
    }

    async fn next(&mut self) -> Outbound {
        match tokio::time::timeout(Duration::from_secs(5), self.outbound.recv()).await {
            Ok(Some(outbound)) => outbound,
            Ok(None) => panic!("transport closed"),
            Err(_) => panic!("no outbound message within 5s"),
        }
    }

    /// Next message of `message_type`, skipping everything else.
    async fn next_of(&mut self, message_type: MessageType) -> Outbound {
        loop {
            let outbound = self.next().await;
            if outbound.envelope.message_type == message_type {
                return outbound;
            }
        }
    }

    /// No message of `message_type` arrives within a short grace period.
    async fn assert_none_of(&mut self, message_type: MessageType) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
        while let Ok(Some(outbound)) = tokio::time::timeout_at(deadline, self.outbound.recv()).await {
            assert_ne!(outbound.envelope.message_type, message_type, "unexpected {message_type}");
        }
    }

    async fn init(&mut self, template: &str) -> Outbound {
        self.send(MessageType::TasInitRequest, json!({ "trustModelTemplate": template }), Some("init")).await;
        self.next().await
    }

    async fn grant(&mut self, request: &Outbound, response: MessageType, subscription: &str) {
        let request_id = request.envelope.request_id.as_ref().map(|id| id.as_str().to_owned());
        self.send(response, json!({ "subscriptionId": subscription }), request_id.as_deref()).await;
    }

    async fn established_session(&mut self, template: &str, request: MessageType, response: MessageType) -> String {
        let subscribe = self.init(template).await;
        assert_eq!(subscribe.envelope.message_type, request);
        self.grant(&subscribe, response, &format!("sub-{template}")).await;
        let init = self.next_of(MessageType::TasInitResponse).await;
        assert_eq!(init.envelope.message["success"], json!(true), "init failed: {}", init.envelope.message);
        match init.envelope.message["sessionId"].as_str() {
            Some(id) => id.to_owned(),
            None => panic!("init response without session id"),
        }
    }

    async fn teardown(&self, session: &str) {
        self.send(MessageType::TasTeardownRequest, json!({ "sessionId": session }), Some("teardown")).await;
    }
}

#[tokio::test]
async fn discover_lists_builtin_templates() {
    let mut h = Harness::start(EngineConfig::default());
    h.send(MessageType::TasTmtDiscover, json!({}), Some("r-1")).await;
    let offer = h.next().await;
    assert_eq!(offer.topic, CLIENT_TOPIC);
    assert_eq!(offer.envelope.message_type, MessageType::TasTmtOffer);
    assert_eq!(offer.envelope.request_id.as_ref().map(|id| id.as_str()), Some("r-1"));
    let templates = &offer.envelope.message["trustModelTemplates"];
    for identifier in ["IMA_STANDALONE@0.0.2", "VCM@0.0.1", "NTM_STANDALONE@0.0.1"] {
        assert!(templates.get(identifier).is_some(), "{identifier} missing from {templates}");
    }
    h.engine.shutdown().await;
}

#[tokio::test]
async fn unknown_template_is_refused() {
    let mut h = Harness::start(EngineConfig::default());
    let response = h.init("NOPE@9.9.9").await;
    assert_eq!(response.envelope.message_type, MessageType::TasInitResponse);
    assert_eq!(response.envelope.message["success"], json!(false));
    assert!(response.envelope.message["error"].as_str().is_some_and(|e| e.contains("NOPE@9.9.9")));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn invalid_messages_are_discarded() {
    let mut h = Harness::start(EngineConfig::default());
    h.send(MessageType::TasInitRequest, json!({ "params": {} }), Some("bad")).await;
    h.send(MessageType::TasTmtDiscover, json!({}), Some("good")).await;
    let first = h.next().await;
    assert_eq!(first.envelope.message_type, MessageType::TasTmtOffer, "the malformed init gets no answer");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn attestation_session_lifecycle() {
    let mut h = Harness::start(EngineConfig::default());
    let subscribe = h.init("VCM@0.0.1").await;
    assert_eq!(subscribe.topic, "aiv");
    assert_eq!(subscribe.envelope.message_type, MessageType::AivSubscribeRequest);
    assert_eq!(subscribe.envelope.response_topic.as_deref(), Some("taf"));
    assert_eq!(subscribe.envelope.message["subscribe"].as_array().map(Vec::len), Some(2));
    h.grant(&subscribe, MessageType::AivSubscribeResponse, "aiv-1").await;
    let init = h.next_of(MessageType::TasInitResponse).await;
    assert_eq!(init.envelope.request_id.as_ref().map(|id| id.as_str()), Some("init"));
    let Some(session) = init.envelope.message["sessionId"].as_str().map(str::to_owned) else {
        panic!("init response without session id: {}", init.envelope.message);
    };

    h.send(
        MessageType::TasSubscribeRequest,
        json!({ "sessionId": session, "trigger": "ACTUAL_TRUSTWORTHINESS_LEVEL" }),
        Some("sub"),
    )
    .await;
    let subscribed = h.next_of(MessageType::TasSubscribeResponse).await;
    assert_eq!(subscribed.envelope.message["success"], json!(true));

    let claims: Vec<Value> = ["SECURE_BOOT", "SECURE_OTA", "ACCESS_CONTROL"]
        .iter()
        .map(|claim| json!({ "claim": claim, "appraisal": 1 }))
        .collect();
    h.send(
        MessageType::AivNotify,
        json!({
            "subscriptionId": "aiv-1",
            "trusteeReports": [{ "trusteeID": "VC1", "attestationReport": claims }]
        }),
        None,
    )
    .await;
    let vc1_belief = loop {
        let notify = h.next_of(MessageType::TasNotify).await;
        let update = &notify.envelope.message["updates"][0];
        if update["version"].as_u64().unwrap_or_default() == 0 {
            continue;
        }
        let vc1 = update["propositions"]
            .as_array()
            .and_then(|rows| rows.iter().find(|row| row["propositionId"] == json!("VC1")).cloned());
        let Some(vc1) = vc1 else {
            panic!("VC1 missing from {update}");
        };
        break vc1["actualTrustworthinessLevel"][0]["output"]["belief"].as_f64().unwrap_or_default();
    };
    assert!(vc1_belief > 0.2, "positive appraisals must raise belief above the prior, got {vc1_belief}");

    h.send(MessageType::TasTaRequest, json!({ "sessionId": session }), Some("ta")).await;
    let ta = h.next_of(MessageType::TasTaResponse).await;
    let results = ta.envelope.message["results"].as_array().cloned().unwrap_or_default();
    assert_eq!(results.len(), 1);
    assert!(results[0]["id"].as_str().is_some_and(|id| id.ends_with("/VCM@0.0.1/VCM")));

    h.teardown(&session).await;
    let unsubscribe = h.next_of(MessageType::AivUnsubscribeRequest).await;
    assert_eq!(unsubscribe.envelope.message["subscriptionId"], json!("aiv-1"));
    let torn_down = h.next_of(MessageType::TasTeardownResponse).await;
    assert_eq!(torn_down.envelope.message["success"], json!(true));

    h.send(MessageType::TasTaRequest, json!({ "sessionId": session }), Some("ta")).await;
    let gone = h.next_of(MessageType::TasTaResponse).await;
    assert!(gone.envelope.message["error"].as_str().is_some_and(|e| e.contains("not found")));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn misbehavior_subscription_is_shared_between_sessions() {
    let mut h = Harness::start(EngineConfig::default());
    let first = h.established_session("IMA_STANDALONE@0.0.2", MessageType::MbdSubscribeRequest, MessageType::MbdSubscribeResponse).await;

    h.send(MessageType::TasInitRequest, json!({ "trustModelTemplate": "IMA_STANDALONE@0.0.2" }), Some("init")).await;
    let second_init = h.next().await;
    assert_eq!(second_init.envelope.message_type, MessageType::TasInitResponse, "no second MBD subscribe");
    let Some(second) = second_init.envelope.message["sessionId"].as_str().map(str::to_owned) else {
        panic!("init response without session id");
    };

    h.teardown(&first).await;
    let response = h.next().await;
    assert_eq!(response.envelope.message_type, MessageType::TasTeardownResponse, "shared subscription kept");

    h.teardown(&second).await;
    let unsubscribe = h.next().await;
    assert_eq!(unsubscribe.envelope.message_type, MessageType::MbdUnsubscribeRequest);
    assert_eq!(unsubscribe.topic, "mbd");
    let response = h.next().await;
    assert_eq!(response.envelope.message_type, MessageType::TasTeardownResponse);
    h.assert_none_of(MessageType::MbdUnsubscribeRequest).await;
    h.engine.shutdown().await;
}

#[tokio::test]
async fn teardown_while_initializing_is_deferred() {
    let mut config = EngineConfig::default();
    config.debug.fixed_session_id = Some("fixed".to_owned());
    let mut h = Harness::start(config);
    let subscribe = h.init("IMA_STANDALONE@0.0.2").await;
    h.teardown("fixed").await;
    h.assert_none_of(MessageType::TasTeardownResponse).await;

    h.grant(&subscribe, MessageType::MbdSubscribeResponse, "mbd-1").await;
    let init = h.next_of(MessageType::TasInitResponse).await;
    assert_eq!(init.envelope.message["success"], json!(false));
    let torn_down = h.next_of(MessageType::TasTeardownResponse).await;
    assert_eq!(torn_down.envelope.message["success"], json!(true));
    assert_eq!(torn_down.envelope.request_id.as_ref().map(|id| id.as_str()), Some("teardown"));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn refused_subscription_fails_init_and_discards_the_session() {
    let mut config = EngineConfig::default();
    config.debug.fixed_session_id = Some("fixed".to_owned());
    let mut h = Harness::start(config);
    let subscribe = h.init("VCM@0.0.1").await;
    assert_eq!(subscribe.envelope.message_type, MessageType::AivSubscribeRequest);

    let request_id = subscribe.envelope.request_id.as_ref().map(|id| id.as_str().to_owned());
    h.send(MessageType::AivSubscribeResponse, json!({ "error": "denied" }), request_id.as_deref()).await;
    let init = h.next_of(MessageType::TasInitResponse).await;
    assert_eq!(init.envelope.message["success"], json!(false));
    let error = init.envelope.message["error"].as_str().unwrap_or_default();
    assert!(error.contains("denied"), "refusal reason must reach the client, got {error:?}");

    h.send(MessageType::TasTaRequest, json!({ "sessionId": "fixed" }), Some("ta")).await;
    let ta = h.next_of(MessageType::TasTaResponse).await;
    let error = ta.envelope.message["error"].as_str().unwrap_or_default();
    assert!(error.contains("not found"), "failed session must be gone, got {error:?}");
    h.assert_none_of(MessageType::TasInitResponse).await;
    h.engine.shutdown().await;
}

#[tokio::test]
async fn vehicles_seen_on_v2x_get_instances() {
    let mut h = Harness::start(EngineConfig::default());
    let session =
        h.established_session("IMA_STANDALONE@0.0.2", MessageType::MbdSubscribeRequest, MessageType::MbdSubscribeResponse).await;

    h.send(
        MessageType::V2xCpm,
        json!({ "sourceId": 5, "PerceivedObjectContainer": { "objects": [{ "objectId": 19 }] } }),
        None,
    )
    .await;
    h.send(
        MessageType::MbdNotify,
        json!({
            "subscriptionId": "sub-IMA_STANDALONE@0.0.2",
            "CPM_REPORT": { "content": {
                "observationSet": [{ "check": 0, "targetId": 19 }],
                "V2XPduEvidence": { "sourceId": 5 }
            }}
        }),
        None,
    )
    .await;

    let mut propositions = Vec::new();
    for _ in 0..50 {
        h.send(MessageType::TasTaRequest, json!({ "sessionId": session }), Some("ta")).await;
        let ta = h.next_of(MessageType::TasTaResponse).await;
        let results = ta.envelope.message["results"].as_array().cloned().unwrap_or_default();
        if let Some(result) = results.first() {
            propositions = result["propositions"].as_array().cloned().unwrap_or_default();
            if propositions.iter().any(|p| p["propositionId"] == json!("C_5_19")) {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(
        propositions.iter().any(|p| p["propositionId"] == json!("C_5_19")),
        "observed object must become a proposition, got {propositions:?}"
    );
    h.engine.shutdown().await;
}
