//! Vehicle computer migration.
//!
//! A static model: the TAF rates the two vehicle computers of the ego
//! vehicle from attestation evidence, starting from a design-time prior.

use std::collections::BTreeSet;

use taf_core::{
    AdjacencyEntry, CoreError, DiscountOperator, EntityId, EntityPattern, EvidenceType, FusionOperator,
    Params, Rtls, SecurityControl, Spawned, SubjectiveOpinion, TemplateKind, TmiId, TrustGraphStructure,
    TrustModelInstance, TrustModelTemplate, TrustRelationship, TrustSource, TrustSourceQuantifier, TrustValues,
    Update,
};

use crate::params::{self, WeightKeys};

pub const NAME: &str = "VCM";
pub const VERSION: &str = "0.0.1";

const TRUSTOR: &str = "TAF";

const AIV_DEFAULTS: [(SecurityControl, f64, u8); 6] = [
    (SecurityControl::SecureBoot, 0.2, 2),
    (SecurityControl::AccessControl, 0.2, 0),
    (SecurityControl::ControlFlowIntegrity, 0.1, 2),
    (SecurityControl::SecureOta, 0.1, 0),
    (SecurityControl::ApplicationIsolation, 0.1, 1),
    (SecurityControl::ConfigurationIntegrityVerification, 0.1, 2),
];

/// One vehicle computer: its parameter keys and default trust levels.
struct Computer {
    name: &'static str,
    keys: WeightKeys,
    dti: &'static str,
    rtl: &'static str,
    default_rtl: (f64, f64, f64),
}

const COMPUTERS: [Computer; 2] = [
    Computer {
        name: "VC1",
        keys: WeightKeys { existence: "VC1_EXISTENCE_AIV_", output: "VC1_OUTPUT_AIV_" },
        dti: "VC1_DTI",
        rtl: "VC1_RTL",
        default_rtl: (0.7, 0.2, 0.1),
    },
    Computer {
        name: "VC2",
        keys: WeightKeys { existence: "VC2_EXISTENCE_AIV_", output: "VC2_OUTPUT_AIV_" },
        dti: "VC2_DTI",
        rtl: "VC2_RTL",
        default_rtl: (0.65, 0.25, 0.1),
    },
];

/// Design-time trust in either computer before any evidence.
fn default_prior() -> Result<SubjectiveOpinion, CoreError> {
    SubjectiveOpinion::new(0.2, 0.1, 0.7, 0.5)
}

/// `VCM@0.0.1`
#[derive(Debug, Clone, Copy, Default)]
pub struct VehicleComputerMigration;

impl TrustModelTemplate for VehicleComputerMigration {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn description(&self) -> &str {
        "Trustworthiness of the two vehicle computers of the ego vehicle"
    }

    fn kind(&self) -> TemplateKind {
        TemplateKind::Static
    }

    fn spawn(&self, params: &Params) -> Result<Spawned, CoreError> {
        let trustor = EntityId::named(TRUSTOR)?;
        let mut quantifiers = Vec::with_capacity(COMPUTERS.len());
        let mut computers = Vec::with_capacity(COMPUTERS.len());
        for computer in &COMPUTERS {
            let trustee = EntityId::named(computer.name)?;
            let prior = params::opinion(params, computer.dti, default_prior()?)?;
            let (b, d, u) = computer.default_rtl;
            let rtl = params::opinion(params, computer.rtl, SubjectiveOpinion::new(b, d, u, 0.5)?)?;
            let quantifier =
                params::existence_weighted(params, computer.keys, &AIV_DEFAULTS, EvidenceType::Aiv, Some(prior))?;

            quantifiers.push(TrustSourceQuantifier::new(
                EntityPattern::from(&trustor),
                EntityPattern::from(&trustee),
                EntityPattern::from(&trustee),
                TrustSource::Aiv,
                SecurityControl::ALL.into_iter().map(EvidenceType::Aiv).collect(),
                quantifier,
            ));
            computers.push(ComputerState { trustee, opinion: SubjectiveOpinion::FULL_UNCERTAINTY, rtl });
        }

        let instance = VcmInstance {
            id: TmiId::new(NAME),
            template: self.identifier(),
            version: 0,
            fingerprint: 0,
            trustor,
            computers,
        };
        Ok(Spawned { quantifiers, instance: Some(Box::new(instance)), spawner: None })
    }

    fn evidence_types(&self) -> BTreeSet<EvidenceType> {
        SecurityControl::ALL.into_iter().map(EvidenceType::Aiv).collect()
    }
}

#[derive(Debug)]
struct ComputerState {
    trustee: EntityId,
    opinion: SubjectiveOpinion,
    rtl: SubjectiveOpinion,
}

#[derive(Debug)]
pub struct VcmInstance {
    id: TmiId,
    template: String,
    version: u64,
    fingerprint: u32,
    trustor: EntityId,
    computers: Vec<ComputerState>,
}

impl TrustModelInstance for VcmInstance {
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
            vec![AdjacencyEntry::new(self.trustor.clone(), self.computers.iter().map(|c| c.trustee.clone()).collect())],
        )
    }

    fn values(&self) -> TrustValues {
        self.computers
            .iter()
            .map(|c| {
                let relationship = TrustRelationship::new(self.trustor.clone(), c.trustee.clone(), c.opinion);
                (c.trustee.clone(), vec![relationship])
            })
            .collect()
    }

    fn rtls(&self) -> Rtls {
        self.computers.iter().map(|c| (c.trustee.clone(), c.rtl)).collect()
    }

    fn initialize(&mut self, _params: &Params) {
        self.version = 0;
        // no dynamic nodes
        self.fingerprint = 0;
        for computer in &mut self.computers {
            computer.opinion = SubjectiveOpinion::FULL_UNCERTAINTY;
        }
    }

    fn update(&mut self, update: &Update) -> bool {
        let Update::AtomicTrustOpinion { opinion, trustee, .. } = update else {
            return false;
        };
        let Some(computer) = self.computers.iter_mut().find(|c| c.trustee == *trustee) else {
            tracing::debug!(tmi = %self.id, %trustee, "ignoring opinion on untracked trustee");
            return false;
        };
        computer.opinion = *opinion;
        self.version += 1;
        true
    }
}
