//! Trust model manager.
//!
//! Resolves templates for new sessions and watches V2X traffic: the first
//! CPM of a vehicle spawns instances in every session whose template is
//! vehicle- or trustee-triggered, and vehicles that fall silent lose them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use taf_core::{TemplateRegistry, TrustModelTemplate, Update};
use tokio::time::Instant;

use crate::message::{TemplateDescriptor, TmtOffer, V2xCpm};
use crate::session::{Session, SessionState, SessionTable};
use crate::worker::WorkerCommand;
use crate::EngineError;

pub struct TrustModelManager {
    registry: TemplateRegistry,
    node_ttl: Duration,
    /// Last CPM per vehicle.
    recent: BTreeMap<String, Instant>,
}

impl TrustModelManager {
    #[must_use]
    pub fn new(registry: TemplateRegistry, node_ttl: Duration) -> Self {
        Self { registry, node_ttl, recent: BTreeMap::new() }
    }

    /// # Errors
    /// Returns [`EngineError::UnknownTemplate`] if nothing is registered
    /// under `identifier`.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn TrustModelTemplate>, EngineError> {
        self.registry.resolve(identifier).ok_or_else(|| EngineError::UnknownTemplate(identifier.to_owned()))
    }

    #[must_use]
    pub fn offer(&self) -> TmtOffer {
        let trust_model_templates = self
            .registry
            .templates()
            .map(|template| {
                let descriptor = TemplateDescriptor {
                    name: template.name().to_owned(),
                    version: template.version().to_owned(),
                    description: template.description().to_owned(),
                    kind: template.kind(),
                };
                (template.identifier(), descriptor)
            })
            .collect();
        TmtOffer { trust_model_templates }
    }

    /// Records a sign of life; returns `true` for a vehicle not seen before.
    pub fn observe(&mut self, vehicle: &str, now: Instant) -> bool {
        self.recent.insert(vehicle.to_owned(), now).is_none()
    }

    /// Forgets and returns the vehicles silent for longer than the node TTL.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let ttl = self.node_ttl;
        let expired: Vec<String> = self
            .recent
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > ttl)
            .map(|(vehicle, _)| vehicle.clone())
            .collect();
        for vehicle in &expired {
            self.recent.remove(vehicle);
        }
        expired
    }

    pub fn recent_nodes(&self) -> impl Iterator<Item = &str> {
        self.recent.keys().map(String::as_str)
    }

    /// Spawns instances for a newly seen sender and refreshes the object
    /// set of every dynamic instance.
    pub fn handle_cpm(&mut self, cpm: &V2xCpm, sessions: &mut SessionTable, now: Instant) -> Vec<WorkerCommand> {
        let vehicle = cpm.source_id.to_string();
        if self.observe(&vehicle, now) {
            tracing::info!(%vehicle, "new vehicle observed");
        }
        let objects: Vec<String> = cpm.perceived_objects.objects.iter().map(|o| o.object_id.to_string()).collect();
        let update = Update::refresh_cpm(vehicle.as_str(), objects);

        let mut commands = Vec::new();
        for session in sessions.values_mut() {
            if session.state() != SessionState::Established || session.spawner().is_none() {
                continue;
            }
            if !session.knows_vehicle(&vehicle) {
                commands.extend(Self::spawn_for(session, &vehicle));
            }
            commands.extend(session.tmis().map(|tmi| WorkerCommand::Update { tmi: tmi.clone(), update: update.clone() }));
        }
        commands
    }

    /// Destroys the dynamic instances of every vehicle past its TTL.
    pub fn expire_idle(&mut self, sessions: &mut SessionTable, now: Instant) -> Vec<WorkerCommand> {
        let mut commands = Vec::new();
        for vehicle in self.expire(now) {
            tracing::info!(%vehicle, "vehicle expired");
            for session in sessions.values_mut() {
                for tmi in session.remove_vehicle(&vehicle) {
                    tracing::debug!(session = %session.id(), %tmi, "removing idle instance");
                    commands.push(WorkerCommand::Remove { tmi });
                }
            }
        }
        commands
    }

    fn spawn_for(session: &mut Session, vehicle: &str) -> Vec<WorkerCommand> {
        let Some(spawner) = session.spawner().cloned() else {
            return Vec::new();
        };
        let params = session.params().clone();
        let mut commands = Vec::new();
        for spawned in [spawner.on_new_vehicle(vehicle, &params), spawner.on_new_trustee(vehicle, &params)] {
            match spawned {
                Ok(Some(instance)) => {
                    let tmi = session.add_dynamic_tmi(vehicle, instance.id().clone());
                    tracing::info!(session = %session.id(), %tmi, "spawned instance");
                    commands.push(WorkerCommand::Init { tmi, instance, params: params.clone() });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(session = %session.id(), %vehicle, error = %e, "spawner refused vehicle"),
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use taf_core::{ClientId, Params, SessionId, TemplateKind};
    use taf_models::{register_builtin, ImaStandalone, NtmStandalone, VehicleComputerMigration};

    use super::*;
    use crate::message::{PerceivedObject, PerceivedObjectContainer};

    fn manager() -> TrustModelManager {
        let mut registry = TemplateRegistry::new();
        register_builtin(&mut registry);
        TrustModelManager::new(registry, Duration::from_secs(5))
    }

    fn established(id: &str, template: Arc<dyn TrustModelTemplate>) -> Session {
        let spawned = match template.spawn(&Params::new()) {
            Ok(s) => s,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let mut session = Session::new(
            SessionId::new(id),
            ClientId::new("client"),
            template,
            Params::new(),
            spawned.quantifiers,
            spawned.spawner,
        );
        if let Some(instance) = spawned.instance {
            session.add_tmi(instance.id().clone());
        }
        if let Err(e) = session.establish() {
            panic!("establish failed: {e}");
        }
        session
    }

    fn cpm(source: u64, objects: &[u64]) -> V2xCpm {
        V2xCpm {
            source_id: source,
            perceived_objects: PerceivedObjectContainer {
                objects: objects.iter().map(|&object_id| PerceivedObject { object_id }).collect(),
            },
        }
    }

    fn table(sessions: Vec<Session>) -> SessionTable {
        sessions.into_iter().map(|s| (s.id().clone(), s)).collect()
    }

    #[test]
    fn resolve_and_offer_cover_builtin_templates() {
        let tmm = manager();
        assert!(tmm.resolve("IMA_STANDALONE@0.0.2").is_ok());
        assert!(matches!(tmm.resolve("NOPE@1"), Err(EngineError::UnknownTemplate(name)) if name == "NOPE@1"));
        let offer = tmm.offer();
        assert_eq!(offer.trust_model_templates.len(), 3);
        assert_eq!(offer.trust_model_templates.get("VCM@0.0.1").map(|d| d.kind), Some(TemplateKind::Static));
    }

    #[test]
    fn first_cpm_spawns_then_refreshes() {
        let mut tmm = manager();
        let mut sessions = table(vec![established("ima", Arc::new(ImaStandalone))]);
        let now = Instant::now();

        let first = tmm.handle_cpm(&cpm(5, &[19, 27]), &mut sessions, now);
        assert!(matches!(first.as_slice(), [WorkerCommand::Init { .. }, WorkerCommand::Update { .. }]));
        assert_eq!(first[0].tmi().tmi.as_str(), "V_5");
        match &first[1] {
            WorkerCommand::Update { update: Update::RefreshCpm { source, objects }, .. } => {
                assert_eq!(source, "5");
                assert_eq!(objects, &vec!["19".to_owned(), "27".to_owned()]);
            }
            other => panic!("expected a CPM refresh, got {other:?}"),
        }

        let second = tmm.handle_cpm(&cpm(5, &[19]), &mut sessions, now);
        assert!(matches!(second.as_slice(), [WorkerCommand::Update { .. }]), "no second spawn");

        let other = tmm.handle_cpm(&cpm(7, &[]), &mut sessions, now);
        let inits = other.iter().filter(|c| matches!(c, WorkerCommand::Init { .. })).count();
        let refreshes = other.iter().filter(|c| matches!(c, WorkerCommand::Update { .. })).count();
        assert_eq!((inits, refreshes), (1, 2), "every instance of the session sees the refresh");
    }

    #[test]
    fn trustee_triggered_and_static_sessions() {
        let mut tmm = manager();
        let mut sessions = table(vec![
            established("mec", Arc::new(NtmStandalone)),
            established("vcm", Arc::new(VehicleComputerMigration)),
        ]);
        let commands = tmm.handle_cpm(&cpm(5, &[]), &mut sessions, Instant::now());
        let spawned: Vec<String> = commands
            .iter()
            .filter(|c| matches!(c, WorkerCommand::Init { .. }))
            .map(|c| c.tmi().to_string())
            .collect();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].ends_with("/vehicle_5"), "got {spawned:?}");
    }

    #[test]
    fn sessions_still_initializing_are_skipped() {
        let mut tmm = manager();
        let template: Arc<dyn TrustModelTemplate> = Arc::new(ImaStandalone);
        let spawned = match template.spawn(&Params::new()) {
            Ok(s) => s,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let pending = Session::new(
            SessionId::new("pending"),
            ClientId::new("client"),
            template,
            Params::new(),
            spawned.quantifiers,
            spawned.spawner,
        );
        let mut sessions = table(vec![pending]);
        assert!(tmm.handle_cpm(&cpm(5, &[19]), &mut sessions, Instant::now()).is_empty());
        assert_eq!(tmm.recent_nodes().collect::<Vec<_>>(), vec!["5"]);
    }

    #[test]
    fn silent_vehicles_lose_their_instances() {
        let mut tmm = manager();
        let mut sessions = table(vec![established("ima", Arc::new(ImaStandalone))]);
        let start = Instant::now();
        tmm.handle_cpm(&cpm(5, &[19]), &mut sessions, start);
        tmm.handle_cpm(&cpm(7, &[]), &mut sessions, start + Duration::from_secs(4));

        let commands = tmm.expire_idle(&mut sessions, start + Duration::from_secs(6));
        match commands.as_slice() {
            [WorkerCommand::Remove { tmi }] => assert_eq!(tmi.tmi.as_str(), "V_5"),
            other => panic!("expected one removal, got {other:?}"),
        }
        assert_eq!(tmm.recent_nodes().collect::<Vec<_>>(), vec!["7"]);

        let again = tmm.handle_cpm(&cpm(5, &[]), &mut sessions, start + Duration::from_secs(7));
        assert!(again.iter().any(|c| matches!(c, WorkerCommand::Init { .. })), "a returning vehicle is spawned anew");
    }
}
