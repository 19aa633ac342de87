//! Shard worker: exclusive owner of a set of trust model instances.
//!
//! A worker processes its command queue strictly in arrival order. After an
//! update changes an instance's version it runs fusion and reports the new
//! result set to the assessment manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use taf_core::{AtlResultSet, FullTmiId, ManagedInstance, Params, TrustModelInstance, Update};
use tokio::sync::mpsc;

use crate::error::FusionError;
use crate::fusion::FusionEngine;

/// Commands addressed to the worker owning `tmi`.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Take ownership of a freshly spawned instance and initialize it.
    Init { tmi: FullTmiId, instance: Box<dyn TrustModelInstance>, params: Params },
    Update { tmi: FullTmiId, update: Update },
    Remove { tmi: FullTmiId },
}

impl WorkerCommand {
    /// Routing key.
    #[must_use]
    pub fn tmi(&self) -> &FullTmiId {
        match self {
            Self::Init { tmi, .. } | Self::Update { tmi, .. } | Self::Remove { tmi } => tmi,
        }
    }
}

/// Reports from workers to the assessment manager.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    AtlUpdated(AtlResultSet),
    FusionFailed { tmi: FullTmiId, error: FusionError },
}

pub struct Worker {
    shard: usize,
    instances: BTreeMap<FullTmiId, ManagedInstance>,
    fusion: Arc<dyn FusionEngine>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Worker {
    #[must_use]
    pub fn new(shard: usize, fusion: Arc<dyn FusionEngine>, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { shard, instances: BTreeMap::new(), fusion, events }
    }

    /// Processes commands until every sender is dropped. Commands already
    /// queued at that point are still processed.
    pub async fn run(mut self, mut commands: mpsc::Receiver<WorkerCommand>) {
        tracing::debug!(shard = self.shard, "worker started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        for instance in self.instances.values_mut() {
            instance.cleanup();
        }
        tracing::debug!(shard = self.shard, "worker stopped");
    }

    pub fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Init { tmi, instance, params } => {
                let mut managed = ManagedInstance::new(instance);
                managed.initialize(&params);
                tracing::info!(shard = self.shard, %tmi, "instance initialized");
                self.evaluate(&tmi, &managed);
                if let Some(mut replaced) = self.instances.insert(tmi, managed) {
                    replaced.cleanup();
                }
            }
            WorkerCommand::Update { tmi, update } => {
                let Some(managed) = self.instances.get_mut(&tmi) else {
                    tracing::debug!(shard = self.shard, %tmi, kind = update.kind(), "update for unknown instance");
                    return;
                };
                if managed.apply(&update) {
                    tracing::debug!(shard = self.shard, %tmi, kind = update.kind(), "instance changed");
                    let managed = &*managed;
                    Self::evaluate_with(self.shard, self.fusion.as_ref(), &self.events, &tmi, managed);
                }
            }
            WorkerCommand::Remove { tmi } => {
                if let Some(mut managed) = self.instances.remove(&tmi) {
                    managed.cleanup();
                    tracing::info!(shard = self.shard, %tmi, "instance removed");
                }
            }
        }
    }

    /// Number of instances this worker owns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn evaluate(&self, tmi: &FullTmiId, managed: &ManagedInstance) {
        Self::evaluate_with(self.shard, self.fusion.as_ref(), &self.events, tmi, managed);
    }

    fn evaluate_with(
        shard: usize,
        fusion: &dyn FusionEngine,
        events: &mpsc::UnboundedSender<WorkerEvent>,
        tmi: &FullTmiId,
        managed: &ManagedInstance,
    ) {
        let instance = managed.instance();
        let version = instance.version();
        let event = match fusion.run(instance.id(), version, instance.fingerprint(), &instance.structure(), &instance.values())
        {
            Ok(atls) => WorkerEvent::AtlUpdated(AtlResultSet::evaluate(tmi.clone(), version, atls, &instance.rtls())),
            Err(error) => {
                tracing::warn!(shard, %tmi, version, %error, "fusion failed");
                WorkerEvent::FusionFailed { tmi: tmi.clone(), error }
            }
        };
        if events.send(event).is_err() {
            tracing::debug!(shard, %tmi, "assessment manager gone, dropping result");
        }
    }
}

#[cfg(test)]
mod tests {
    use taf_core::{ClientId, EntityId, SessionId, SubjectiveOpinion, TmiId, TrustModelTemplate, TrustSource};
    use taf_models::VehicleComputerMigration;

    use super::*;
    use crate::fusion::InternalFusion;

    fn vcm_instance() -> Box<dyn TrustModelInstance> {
        match VehicleComputerMigration.spawn(&Params::new()) {
            Ok(spawned) => match spawned.instance {
                Some(instance) => instance,
                None => panic!("static template must yield an instance"),
            },
            Err(e) => panic!("spawn failed: {e}"),
        }
    }

    fn named(name: &str) -> EntityId {
        match EntityId::named(name) {
            Ok(id) => id,
            Err(e) => panic!("invalid id: {e}"),
        }
    }

    fn full_id() -> FullTmiId {
        FullTmiId::new(ClientId::new("c"), SessionId::new("s"), "VCM@0.0.1", TmiId::new("VCM"))
    }

    fn worker() -> (Worker, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Worker::new(0, Arc::new(InternalFusion), tx), rx)
    }

    #[test]
    fn init_reports_initial_result_set() {
        let (mut worker, mut events) = worker();
        worker.handle(WorkerCommand::Init { tmi: full_id(), instance: vcm_instance(), params: Params::new() });
        assert_eq!(worker.len(), 1);
        match events.try_recv() {
            Ok(WorkerEvent::AtlUpdated(results)) => assert_eq!(results.version(), 0),
            other => panic!("expected initial result set, got {other:?}"),
        }
    }

    #[test]
    fn only_version_changes_trigger_fusion() {
        let (mut worker, mut events) = worker();
        worker.handle(WorkerCommand::Init { tmi: full_id(), instance: vcm_instance(), params: Params::new() });
        let _initial = events.try_recv();

        let untracked = Update::atomic(SubjectiveOpinion::FULL_BELIEF, TrustSource::Aiv, named("TAF"), named("VC9"));
        worker.handle(WorkerCommand::Update { tmi: full_id(), update: untracked });
        assert!(events.try_recv().is_err(), "unchanged version must not run fusion");

        let tracked = Update::atomic(SubjectiveOpinion::FULL_BELIEF, TrustSource::Aiv, named("TAF"), named("VC1"));
        worker.handle(WorkerCommand::Update { tmi: full_id(), update: tracked });
        match events.try_recv() {
            Ok(WorkerEvent::AtlUpdated(results)) => {
                assert_eq!(results.version(), 1);
                assert_eq!(results.decision(&named("VC1")), Some(true));
            }
            other => panic!("expected updated result set, got {other:?}"),
        }
    }

    #[test]
    fn removed_instance_ignores_updates() {
        let (mut worker, mut events) = worker();
        worker.handle(WorkerCommand::Init { tmi: full_id(), instance: vcm_instance(), params: Params::new() });
        let _initial = events.try_recv();
        worker.handle(WorkerCommand::Remove { tmi: full_id() });
        assert!(worker.is_empty());
        let update = Update::atomic(SubjectiveOpinion::FULL_BELIEF, TrustSource::Aiv, named("TAF"), named("VC1"));
        worker.handle(WorkerCommand::Update { tmi: full_id(), update });
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_drains_queue_before_exit() {
        let (worker, mut events) = worker();
        let (tx, rx) = mpsc::channel(4);
        let update = Update::atomic(SubjectiveOpinion::FULL_BELIEF, TrustSource::Aiv, named("TAF"), named("VC2"));
        for command in [
            WorkerCommand::Init { tmi: full_id(), instance: vcm_instance(), params: Params::new() },
            WorkerCommand::Update { tmi: full_id(), update },
        ] {
            if tx.send(command).await.is_err() {
                panic!("queue closed early");
            }
        }
        drop(tx);
        worker.run(rx).await;
        let mut versions = Vec::new();
        while let Ok(WorkerEvent::AtlUpdated(results)) = events.try_recv() {
            versions.push(results.version());
        }
        assert_eq!(versions, vec![0, 1]);
    }
}
