//! Intersection movement assist, standalone variant.
//!
//! One instance per vehicle seen on V2X. The ego vehicle holds an opinion
//! about the sending vehicle (from trust-chain reports) and one about each
//! object that vehicle claims to perceive (from misbehavior detection).
//! Every perceived object is a proposition.

use std::collections::BTreeSet;
use std::sync::Arc;

use taf_core::model::merge_params;
use taf_core::{
    AdjacencyEntry, CoreError, DiscountOperator, DynamicSpawner, DynamicTopology, EntityId, EntityPattern,
    EvidenceType, FusionOperator, Params, Rtls, SecurityControl, Spawned, SubjectiveOpinion, TemplateKind,
    TmiId, TopologyPolicy, TrustGraphStructure, TrustModelInstance, TrustModelTemplate, TrustRelationship,
    TrustSource, TrustSourceQuantifier, TrustValues, Update,
};

use crate::ewma;
use crate::params::{self, TCH_DEFAULTS, TCH_KEYS};

pub const NAME: &str = "IMA_STANDALONE";
pub const VERSION: &str = "0.0.2";

/// Overrides the vehicle an instance was spawned for.
pub const SOURCE_ID: &str = "SOURCE_ID";

#[derive(Debug, Clone, Copy)]
struct Settings {
    policy: TopologyPolicy,
    ewma_alpha: f64,
    rtl: SubjectiveOpinion,
}

impl Settings {
    fn parse(params: &Params) -> Result<Self, CoreError> {
        Ok(Self {
            policy: params::topology_policy(params)?,
            ewma_alpha: params::ewma_alpha(params)?,
            rtl: params::opinion(params, params::RTL, SubjectiveOpinion::FULL_BELIEF)?,
        })
    }
}

/// `IMA_STANDALONE@0.0.2`
#[derive(Debug, Clone, Copy, Default)]
pub struct ImaStandalone;

impl TrustModelTemplate for ImaStandalone {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn description(&self) -> &str {
        "Trust in objects perceived by other vehicles, from trust-chain and misbehavior evidence"
    }

    fn kind(&self) -> TemplateKind {
        TemplateKind::VehicleTriggered
    }

    fn spawn(&self, params: &Params) -> Result<Spawned, CoreError> {
        Settings::parse(params)?;
        let tch = params::existence_weighted(params, TCH_KEYS, &TCH_DEFAULTS, EvidenceType::Tch, None)?;
        let mbd = params::misbehavior_vector(params)?;
        let ego = EntityPattern::from(&EntityId::ego());
        let observation: EntityPattern = "C_*_*".parse()?;

        let quantifiers = vec![
            TrustSourceQuantifier::new(
                ego.clone(),
                "V_*".parse()?,
                observation.clone(),
                TrustSource::Tch,
                SecurityControl::ALL.into_iter().map(EvidenceType::Tch).collect(),
                tch,
            ),
            TrustSourceQuantifier::new(
                ego,
                observation.clone(),
                observation,
                TrustSource::Mbd,
                vec![EvidenceType::MisbehaviorReport],
                mbd,
            ),
        ];
        let spawner = ImaSpawner { template: self.identifier(), params: params.clone() };
        Ok(Spawned { quantifiers, instance: None, spawner: Some(Arc::new(spawner)) })
    }

    fn evidence_types(&self) -> BTreeSet<EvidenceType> {
        SecurityControl::ALL
            .into_iter()
            .map(EvidenceType::Tch)
            .chain([EvidenceType::MisbehaviorReport])
            .collect()
    }
}

#[derive(Debug)]
struct ImaSpawner {
    template: String,
    params: Params,
}

impl DynamicSpawner for ImaSpawner {
    fn on_new_vehicle(&self, vehicle: &str, params: &Params) -> Result<Option<Box<dyn TrustModelInstance>>, CoreError> {
        let merged = merge_params(&self.params, params);
        let settings = Settings::parse(&merged)?;
        let instance = ImaInstance::new(vehicle, &self.template, settings)?;
        Ok(Some(Box::new(instance)))
    }
}

/// Trust model instance for the CPMs of one vehicle.
#[derive(Debug)]
pub struct ImaInstance {
    id: TmiId,
    template: String,
    source: String,
    version: u64,
    source_opinion: SubjectiveOpinion,
    objects: DynamicTopology,
    ewma_alpha: f64,
    rtl: SubjectiveOpinion,
}

impl ImaInstance {
    fn new(source: &str, template: &str, settings: Settings) -> Result<Self, CoreError> {
        let vehicle = EntityId::new("V", [source])?;
        Ok(Self {
            id: TmiId::new(vehicle.to_string()),
            template: template.to_owned(),
            source: source.to_owned(),
            version: 0,
            source_opinion: SubjectiveOpinion::FULL_UNCERTAINTY,
            objects: DynamicTopology::new(settings.policy),
            ewma_alpha: settings.ewma_alpha,
            rtl: settings.rtl,
        })
    }

    fn source_vehicle(&self) -> EntityId {
        EntityId::vehicle(&self.source)
    }

    fn scope(&self, object: &str) -> EntityId {
        EntityId::observation(&self.source, object)
    }

    /// The tracked object `trustee` refers to, if any.
    fn tracked_object<'a>(&self, trustee: &'a EntityId) -> Option<&'a str> {
        match trustee.segments() {
            [source, object] if trustee.kind() == "C" && *source == self.source && self.objects.contains(object) => {
                Some(object.as_str())
            }
            _ => None,
        }
    }

    fn apply_opinion(&mut self, source: TrustSource, trustee: &EntityId, opinion: &SubjectiveOpinion) -> bool {
        if *trustee == self.source_vehicle() {
            self.source_opinion = *opinion;
            return true;
        }
        let Some(object) = self.tracked_object(trustee).map(str::to_owned) else {
            return false;
        };
        let next = match (source, self.objects.opinion(&object)) {
            (TrustSource::Mbd, Some(previous)) => ewma::smooth(previous, opinion, self.ewma_alpha),
            _ => *opinion,
        };
        self.objects.set_opinion(&object, next)
    }
}

impl TrustModelInstance for ImaInstance {
    fn id(&self) -> &TmiId {
        &self.id
    }

    fn template(&self) -> &str {
        &self.template
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn fingerprint(&self) -> u32 {
        self.objects.fingerprint()
    }

    fn structure(&self) -> TrustGraphStructure {
        let source = self.source_vehicle();
        let observations: Vec<EntityId> = self.objects.iter().map(|(object, _)| self.scope(object)).collect();
        let mut ego_targets = observations.clone();
        ego_targets.push(source.clone());
        TrustGraphStructure::new(
            FusionOperator::CumulativeFusion,
            DiscountOperator::OppositeBeliefDiscount,
            vec![AdjacencyEntry::new(EntityId::ego(), ego_targets), AdjacencyEntry::new(source, observations)],
        )
    }

    fn values(&self) -> TrustValues {
        let ego = EntityId::ego();
        let source = self.source_vehicle();
        self.objects
            .iter()
            .map(|(object, opinion)| {
                let scope = self.scope(object);
                let relationships = vec![
                    TrustRelationship::new(source.clone(), scope.clone(), SubjectiveOpinion::FULL_BELIEF),
                    TrustRelationship::new(ego.clone(), scope.clone(), *opinion),
                    TrustRelationship::new(ego.clone(), source.clone(), self.source_opinion),
                ];
                (scope, relationships)
            })
            .collect()
    }

    fn rtls(&self) -> Rtls {
        self.objects.iter().map(|(object, _)| (self.scope(object), self.rtl)).collect()
    }

    fn initialize(&mut self, params: &Params) {
        if let Some(source) = params.get(SOURCE_ID) {
            match EntityId::new("V", [source.as_str()]) {
                Ok(vehicle) => {
                    self.id = TmiId::new(vehicle.to_string());
                    self.source.clone_from(source);
                }
                Err(e) => tracing::warn!(tmi = %self.id, error = %e, "ignoring invalid source id"),
            }
        }
        self.version = 0;
        self.source_opinion = SubjectiveOpinion::FULL_UNCERTAINTY;
        self.objects = DynamicTopology::new(self.objects.policy());
        // the sender's view of itself
        self.objects.pin(self.source.clone());
    }

    fn update(&mut self, update: &Update) -> bool {
        let changed = match update {
            Update::RefreshCpm { source, objects } if *source == self.source => {
                self.objects.refresh(objects.as_slice())
            }
            Update::RefreshCpm { source, .. } => {
                tracing::debug!(tmi = %self.id, %source, "ignoring CPM from another vehicle");
                false
            }
            Update::AtomicTrustOpinion { opinion, source, trustee, .. } => {
                self.apply_opinion(*source, trustee, opinion)
            }
            Update::NoOp => false,
        };
        if changed {
            self.version += 1;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use taf_core::{EvidenceMap, EvidenceValue};

    use super::*;

    fn instance(params: &[(&str, &str)]) -> Box<dyn TrustModelInstance> {
        let params: Params = params.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        let spawned = match ImaStandalone.spawn(&params) {
            Ok(s) => s,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let Some(spawner) = spawned.spawner else {
            panic!("vehicle-triggered template must yield a spawner");
        };
        let mut tmi = match spawner.on_new_vehicle("5", &Params::new()) {
            Ok(Some(tmi)) => tmi,
            Ok(None) => panic!("spawner declined vehicle"),
            Err(e) => panic!("spawner failed: {e}"),
        };
        tmi.initialize(&Params::new());
        tmi
    }

    fn op(b: f64, d: f64, u: f64) -> SubjectiveOpinion {
        match SubjectiveOpinion::new(b, d, u, 0.5) {
            Ok(o) => o,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    fn mbd(trustee: EntityId, opinion: SubjectiveOpinion) -> Update {
        Update::atomic(opinion, TrustSource::Mbd, EntityId::ego(), trustee)
    }

    #[test]
    fn starts_at_version_and_fingerprint_zero() {
        let tmi = instance(&[]);
        assert_eq!(tmi.id().as_str(), "V_5");
        assert_eq!(tmi.version(), 0);
        assert_eq!(tmi.fingerprint(), 0);
        // self-observation only
        assert_eq!(tmi.values().len(), 1);
    }

    #[test]
    fn untracked_trustee_leaves_state_unchanged() {
        let mut tmi = instance(&[]);
        assert!(!tmi.update(&mbd(EntityId::observation(5, 99), op(0.5, 0.5, 0.0))));
        assert!(!tmi.update(&mbd(EntityId::observation(7, 5), op(0.5, 0.5, 0.0))));
        assert_eq!(tmi.version(), 0);
        assert_eq!(tmi.fingerprint(), 0);
    }

    #[test]
    fn repeated_cpm_only_bumps_version_on_new_objects() {
        let mut tmi = instance(&[]);
        assert!(tmi.update(&Update::refresh_cpm("5", ["19"])));
        let (version, fingerprint) = (tmi.version(), tmi.fingerprint());

        assert!(!tmi.update(&Update::refresh_cpm("5", ["19"])));
        assert_eq!(tmi.version(), version);
        assert_eq!(tmi.fingerprint(), fingerprint);

        assert!(tmi.update(&Update::refresh_cpm("5", ["19", "27"])));
        assert_eq!(tmi.version(), version + 1);
        assert_ne!(tmi.fingerprint(), fingerprint);
    }

    #[test]
    fn cpm_from_other_vehicle_is_ignored() {
        let mut tmi = instance(&[]);
        assert!(!tmi.update(&Update::refresh_cpm("6", ["19"])));
        assert_eq!(tmi.version(), 0);
    }

    #[test]
    fn pruning_policy_drops_vanished_objects() {
        let mut tmi = instance(&[(params::TOPOLOGY_POLICY, "PRUNE")]);
        tmi.update(&Update::refresh_cpm("5", ["19", "27"]));
        assert!(tmi.update(&Update::refresh_cpm("5", ["27"])));
        let scopes: Vec<String> = tmi.values().keys().map(ToString::to_string).collect();
        assert_eq!(scopes, vec!["C_5_27".to_owned(), "C_5_5".to_owned()]);
    }

    #[test]
    fn retain_policy_keeps_vanished_objects() {
        let mut tmi = instance(&[]);
        tmi.update(&Update::refresh_cpm("5", ["19", "27"]));
        assert!(!tmi.update(&Update::refresh_cpm("5", ["27"])));
        assert_eq!(tmi.values().len(), 3);
    }

    #[test]
    fn source_opinion_feeds_every_scope() {
        let mut tmi = instance(&[]);
        tmi.update(&Update::refresh_cpm("5", ["19"]));
        let trust = op(0.7, 0.1, 0.2);
        assert!(tmi.update(&Update::atomic(trust, TrustSource::Tch, EntityId::ego(), EntityId::vehicle(5))));
        for relationships in tmi.values().values() {
            assert!(relationships
                .iter()
                .any(|r| r.destination == EntityId::vehicle(5) && r.opinion.approx_eq(&trust)));
        }
    }

    #[test]
    fn misbehavior_opinions_are_smoothed() {
        let mut tmi = instance(&[(params::EWMA_ALPHA, "0.5")]);
        tmi.update(&Update::refresh_cpm("5", ["19"]));
        let scope = EntityId::observation(5, 19);
        assert!(tmi.update(&mbd(scope.clone(), op(0.8, 0.0, 0.2))));
        let values = tmi.values();
        let stored = values
            .get(&scope)
            .and_then(|rs| rs.iter().find(|r| r.source == EntityId::ego() && r.destination == scope))
            .map(|r| r.opinion);
        assert!(stored.is_some_and(|o| (o.belief() - 0.4).abs() < 1e-12 && (o.uncertainty() - 0.6).abs() < 1e-12));
    }

    #[test]
    fn structure_roots_at_ego() {
        let mut tmi = instance(&[]);
        tmi.update(&Update::refresh_cpm("5", ["19"]));
        let structure = tmi.structure();
        assert_eq!(structure.root(), Some(&EntityId::ego()));
        assert!(structure.targets_of(&EntityId::vehicle(5)).contains(&EntityId::observation(5, 19)));
        assert_eq!(tmi.rtls().len(), 2);
    }

    #[test]
    fn quantifiers_cover_vehicles_and_observations() {
        let spawned = match ImaStandalone.spawn(&Params::new()) {
            Ok(s) => s,
            Err(e) => panic!("spawn failed: {e}"),
        };
        let tch = spawned.quantifiers.iter().find(|q| q.source == TrustSource::Tch);
        assert!(tch.is_some_and(|q| q.applies_to(TrustSource::Tch, &EntityId::vehicle(19))));
        let mbd = spawned.quantifiers.iter().find(|q| q.source == TrustSource::Mbd);
        let evidence = EvidenceMap::from([(EvidenceType::MisbehaviorReport, EvidenceValue::Bitmask(0))]);
        assert!(mbd.is_some_and(|q| q.applies_to(TrustSource::Mbd, &EntityId::observation(5, 19))
            && q.quantify(&evidence).belief() > 0.0));
    }

    #[test]
    fn invalid_policy_fails_spawn() {
        let params = Params::from([(params::TOPOLOGY_POLICY.to_owned(), "MAYBE".to_owned())]);
        assert!(ImaStandalone.spawn(&params).is_err());
    }
}
