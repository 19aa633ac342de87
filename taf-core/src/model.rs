//! Trust model templates and the instances they spawn.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::evidence::{EvidenceType, TrustSource};
use crate::id::{EntityId, TmiId};
use crate::opinion::SubjectiveOpinion;
use crate::quantifier::TrustSourceQuantifier;
use crate::structure::{TrustGraphStructure, TrustValues};
use crate::update::Update;

/// String parameters passed at spawn time.
pub type Params = BTreeMap<String, String>;

/// Required trust level per proposition.
pub type Rtls = BTreeMap<EntityId, SubjectiveOpinion>;

/// Overlays `overlay` onto `base`; keys in `overlay` win.
#[must_use]
pub fn merge_params(base: &Params, overlay: &Params) -> Params {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Parses an optional numeric parameter.
///
/// # Errors
/// Returns [`CoreError::InvalidParameter`] if the value is present but not a number.
pub fn float_param(params: &Params, key: &str) -> Result<Option<f64>, CoreError> {
    params
        .get(key)
        .map(|raw| {
            raw.trim().parse::<f64>().map_err(|e| CoreError::InvalidParameter { key: key.to_owned(), reason: e.to_string() })
        })
        .transpose()
}

/// How instances of a template come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateKind {
    /// One instance created at session init.
    Static,
    /// One instance per vehicle seen on V2X.
    VehicleTriggered,
    /// One instance per trustee seen on V2X.
    TrusteeTriggered,
}

/// A running trust model: topology plus opinions, versioned.
///
/// `update` returns `true` exactly when the version changed, which is the
/// caller's signal to re-run fusion.
pub trait TrustModelInstance: Send + fmt::Debug {
    fn id(&self) -> &TmiId;
    fn template(&self) -> &str;
    fn version(&self) -> u64;
    fn fingerprint(&self) -> u32;
    fn structure(&self) -> TrustGraphStructure;
    fn values(&self) -> TrustValues;
    fn rtls(&self) -> Rtls;
    fn initialize(&mut self, params: &Params);
    fn update(&mut self, update: &Update) -> bool;
    fn cleanup(&mut self) {}
}

/// Creates instances lazily as vehicles or trustees appear.
pub trait DynamicSpawner: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns an error if the merged parameters are invalid.
    fn on_new_vehicle(&self, vehicle: &str, params: &Params) -> Result<Option<Box<dyn TrustModelInstance>>, CoreError> {
        let _ = (vehicle, params);
        Ok(None)
    }

    /// # Errors
    /// Returns an error if the merged parameters are invalid.
    fn on_new_trustee(&self, trustee: &str, params: &Params) -> Result<Option<Box<dyn TrustModelInstance>>, CoreError> {
        let _ = (trustee, params);
        Ok(None)
    }
}

/// Result of spawning a template for a session.
#[derive(Debug, Default)]
pub struct Spawned {
    pub quantifiers: Vec<TrustSourceQuantifier>,
    pub instance: Option<Box<dyn TrustModelInstance>>,
    pub spawner: Option<Arc<dyn DynamicSpawner>>,
}

/// Immutable factory for one named, versioned trust model family.
pub trait TrustModelTemplate: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;
    fn kind(&self) -> TemplateKind;

    /// # Errors
    /// Returns [`CoreError::InvalidParameter`] or [`CoreError::InvalidWeights`]
    /// for a parameter set that cannot yield valid quantifiers.
    fn spawn(&self, params: &Params) -> Result<Spawned, CoreError>;

    /// Evidence consumed by the default quantifiers.
    fn evidence_types(&self) -> BTreeSet<EvidenceType>;

    /// `name@version`
    fn identifier(&self) -> String {
        format!("{}@{}", self.name(), self.version())
    }

    fn trust_sources(&self) -> BTreeSet<TrustSource> {
        self.evidence_types().into_iter().map(EvidenceType::source).collect()
    }
}

/// Lifecycle of an instance as seen by its owning worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmiState {
    Spawned,
    Initialized,
    Active,
    Destroyed,
}

/// Enforces the instance lifecycle around a model implementation.
#[derive(Debug)]
pub struct ManagedInstance {
    inner: Box<dyn TrustModelInstance>,
    state: TmiState,
}

impl ManagedInstance {
    #[must_use]
    pub fn new(inner: Box<dyn TrustModelInstance>) -> Self {
        Self { inner, state: TmiState::Spawned }
    }

    /// Initializes a freshly spawned instance; later calls are ignored.
    pub fn initialize(&mut self, params: &Params) {
        if self.state == TmiState::Spawned {
            self.inner.initialize(params);
            self.state = TmiState::Initialized;
        }
    }

    /// Applies an update; returns `true` if the version changed.
    ///
    /// Updates before initialization or after cleanup are ignored.
    pub fn apply(&mut self, update: &Update) -> bool {
        match self.state {
            TmiState::Initialized | TmiState::Active => {
                self.state = TmiState::Active;
                let before = self.inner.version();
                self.inner.update(update) && self.inner.version() != before
            }
            TmiState::Spawned | TmiState::Destroyed => false,
        }
    }

    pub fn cleanup(&mut self) {
        if self.state != TmiState::Destroyed {
            self.inner.cleanup();
            self.state = TmiState::Destroyed;
        }
    }

    #[must_use]
    pub fn state(&self) -> TmiState {
        self.state
    }

    #[must_use]
    pub fn instance(&self) -> &dyn TrustModelInstance {
        self.inner.as_ref()
    }
}
