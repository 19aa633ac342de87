//! Network trust model run by a mobile edge computer.
//!
//! Trustee-triggered: the MEC holds one instance per vehicle it hears on
//! V2X. Trust-chain, misbehavior and peer (NTM) opinions about the vehicle
//! are kept as separate components and fused cumulatively into the single
//! `MEC -> vehicle_x` edge.

use std::collections::BTreeSet;
use std::sync::Arc;

use taf_core::model::merge_params;
use taf_core::{
    fnv1a_32, AdjacencyEntry, CoreError, DiscountOperator, DynamicSpawner, EntityId, EntityPattern, EvidenceType,
    FusionOperator, Params, PassThrough, Rtls, SecurityControl, Spawned, SubjectiveOpinion, TemplateKind, TmiId,
    TrustGraphStructure, TrustModelInstance, TrustModelTemplate, TrustRelationship, TrustSource,
    TrustSourceQuantifier, TrustValues, Update,
};

use crate::ewma;
use crate::params::{self, TCH_DEFAULTS, TCH_KEYS};

pub const NAME: &str = "NTM_STANDALONE";
pub const VERSION: &str = "0.0.1";

/// Overrides the trustee an instance was spawned for.
pub const TRUSTEE_ID: &str = "TRUSTEE_ID";

const TRUSTOR: &str = "MEC";
const TRUSTEE_KIND: &str = "vehicle";

fn default_rtl() -> Result<SubjectiveOpinion, CoreError> {
    SubjectiveOpinion::new(0.7, 0.2, 0.1, 0.5)
}

/// `NTM_STANDALONE@0.0.1`
#[derive(Debug, Clone, Copy, Default)]
pub struct NtmStandalone;

impl TrustModelTemplate for NtmStandalone {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn description(&self) -> &str {
        "MEC trust in nearby vehicles from trust-chain, misbehavior and peer opinions"
    }

    fn kind(&self) -> TemplateKind {
        TemplateKind::TrusteeTriggered
    }

    fn spawn(&self, params: &Params) -> Result<Spawned, CoreError> {
        params::ewma_alpha(params)?;
        params::opinion(params, params::RTL, default_rtl()?)?;
        let tch = params::existence_weighted(params, TCH_KEYS, &TCH_DEFAULTS, EvidenceType::Tch, None)?;
        let mbd = params::misbehavior_vector(params)?;
        let trustor = EntityPattern::from(&EntityId::named(TRUSTOR)?);
        let trustee: EntityPattern = format!("{TRUSTEE_KIND}_*").parse()?;

        let quantifiers = vec![
            TrustSourceQuantifier::new(
                trustor.clone(),
                trustee.clone(),
                trustee.clone(),
                TrustSource::Tch,
                SecurityControl::ALL.into_iter().map(EvidenceType::Tch).collect(),
                tch,
            ),
            TrustSourceQuantifier::new(
                trustor.clone(),
                trustee.clone(),
                trustee.clone(),
                TrustSource::Mbd,
                vec![EvidenceType::MisbehaviorReport],
                mbd,
            ),
            TrustSourceQuantifier::new(
                trustor,
                trustee.clone(),
                trustee,
                TrustSource::Ntm,
                vec![EvidenceType::RemoteOpinion],
                PassThrough,
            ),
        ];
        let spawner = MecSpawner { template: self.identifier(), params: params.clone() };
        Ok(Spawned { quantifiers, instance: None, spawner: Some(Arc::new(spawner)) })
    }

    fn evidence_types(&self) -> BTreeSet<EvidenceType> {
        SecurityControl::ALL
            .into_iter()
            .map(EvidenceType::Tch)
            .chain([EvidenceType::MisbehaviorReport, EvidenceType::RemoteOpinion])
            .collect()
    }
}

#[derive(Debug)]
struct MecSpawner {
    template: String,
    params: Params,
}

impl DynamicSpawner for MecSpawner {
    fn on_new_trustee(&self, trustee: &str, params: &Params) -> Result<Option<Box<dyn TrustModelInstance>>, CoreError> {
        let merged = merge_params(&self.params, params);
        let target = trustee_id(trustee)?;
        let instance = MecInstance {
            id: TmiId::new(target.to_string()),
            template: self.template.clone(),
            version: 0,
            fingerprint: 0,
            trustor: EntityId::named(TRUSTOR)?,
            trustee: trustee.to_owned(),
            target,
            omega_tch: SubjectiveOpinion::FULL_UNCERTAINTY,
            omega_mbd: SubjectiveOpinion::FULL_UNCERTAINTY,
            omega_ntm: SubjectiveOpinion::FULL_UNCERTAINTY,
            ewma_alpha: params::ewma_alpha(&merged)?,
            rtl: params::opinion(&merged, params::RTL, default_rtl()?)?,
        };
        Ok(Some(Box::new(instance)))
    }
}

fn trustee_id(trustee: &str) -> Result<EntityId, CoreError> {
    EntityId::new(TRUSTEE_KIND, [trustee])
}

/// The MEC's view of one vehicle.
#[derive(Debug)]
pub struct MecInstance {
    id: TmiId,
    template: String,
    version: u64,
    fingerprint: u32,
    trustor: EntityId,
    trustee: String,
    target: EntityId,
    omega_tch: SubjectiveOpinion,
    omega_mbd: SubjectiveOpinion,
    omega_ntm: SubjectiveOpinion,
    ewma_alpha: f64,
    rtl: SubjectiveOpinion,
}

impl MecInstance {
    fn trustee_opinion(&self) -> SubjectiveOpinion {
        FusionOperator::CumulativeFusion
            .fuse_all([&self.omega_tch, &self.omega_mbd, &self.omega_ntm])
            .unwrap_or_else(|e| {
                tracing::warn!(tmi = %self.id, error = %e, "fusing components failed");
                SubjectiveOpinion::FULL_UNCERTAINTY
            })
    }
}

impl TrustModelInstance for MecInstance {
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
        self.fingerprint
    }

    fn structure(&self) -> TrustGraphStructure {
        TrustGraphStructure::new(
            FusionOperator::CumulativeFusion,
            DiscountOperator::OppositeBeliefDiscount,
            vec![AdjacencyEntry::new(self.trustor.clone(), vec![self.target.clone()])],
        )
    }

    fn values(&self) -> TrustValues {
        let edge = TrustRelationship::new(self.trustor.clone(), self.target.clone(), self.trustee_opinion());
        TrustValues::from([(self.target.clone(), vec![edge])])
    }

    fn rtls(&self) -> Rtls {
        Rtls::from([(self.target.clone(), self.rtl)])
    }

    fn initialize(&mut self, params: &Params) {
        if let Some(trustee) = params.get(TRUSTEE_ID) {
            match trustee_id(trustee) {
                Ok(target) => {
                    self.id = TmiId::new(target.to_string());
                    self.trustee.clone_from(trustee);
                    self.target = target;
                }
                Err(e) => tracing::warn!(tmi = %self.id, error = %e, "ignoring invalid trustee id"),
            }
        }
        self.version = 0;
        self.fingerprint = fnv1a_32(self.trustee.as_bytes());
    }

    fn update(&mut self, update: &Update) -> bool {
        let Update::AtomicTrustOpinion { opinion, source, trustee, .. } = update else {
            return false;
        };
        if *trustee != self.target {
            return false;
        }
        match source {
            TrustSource::Tch => self.omega_tch = *opinion,
            TrustSource::Mbd => self.omega_mbd = ewma::smooth(&self.omega_mbd, opinion, self.ewma_alpha),
            TrustSource::Ntm => self.omega_ntm = *opinion,
            TrustSource::Aiv => return false,
        }
        self.version += 1;
        true
    }
}
