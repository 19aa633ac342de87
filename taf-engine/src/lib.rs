//! Asynchronous trust assessment engine.
//!
//! Wires the trust assessment manager, the trust source handlers, the
//! trust model manager and a sharded worker pool together behind a small
//! handle: envelopes go in through [`EngineHandle::submit`], responses and
//! evidence-source requests come out through a [`Transport`].

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod fusion;
pub mod message;
pub mod pool;
pub mod session;
pub mod sources;
pub mod tam;
pub mod tmm;
pub mod transport;
pub mod tsm;
pub mod validator;
pub mod worker;

use std::sync::Arc;

use taf_core::TemplateRegistry;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use config::EngineConfig;
pub use error::{EngineError, FusionError, TransportError};
pub use message::{Envelope, MessageType};
pub use transport::{ChannelTransport, Outbound, Transport};

use crate::crypto::Crypto;
use crate::fusion::{FusionEngine, InternalFusion};
use crate::pool::WorkerPool;
use crate::tam::{Channels, TrustAssessmentManager};
use crate::tmm::TrustModelManager;
use crate::validator::{SchemaValidator, SerdeValidator};

/// Pluggable collaborators of the engine.
pub struct Collaborators {
    pub fusion: Arc<dyn FusionEngine>,
    pub crypto: Box<dyn Crypto>,
    pub validator: Box<dyn SchemaValidator>,
}

impl Collaborators {
    /// Internal fusion, serde validation and the crypto the configuration
    /// asks for.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if an external fusion engine is
    /// requested, since none ships with this crate.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        if !config.tlee.use_internal_tlee {
            return Err(EngineError::Config("no external trust level expression engine is available".to_owned()));
        }
        Ok(Self {
            fusion: Arc::new(InternalFusion),
            crypto: crypto::from_config(&config.crypto),
            validator: Box::new(SerdeValidator),
        })
    }
}

/// Running engine.
pub struct EngineHandle {
    inbound: mpsc::Sender<Envelope>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Starts the engine with the collaborators the configuration implies.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if the configuration is invalid.
    pub fn start(
        config: EngineConfig,
        registry: TemplateRegistry,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineError> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::start_with(config, registry, transport, collaborators)
    }

    /// Starts the engine with explicit collaborators.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if the configuration is invalid.
    pub fn start_with(
        config: EngineConfig,
        registry: TemplateRegistry,
        transport: Arc<dyn Transport>,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (inbound_tx, inbound) = mpsc::channel(config.chan_buf_size);
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let pool = WorkerPool::spawn(
            config.tam.trust_model_instance_shards,
            config.chan_buf_size,
            &collaborators.fusion,
            &events_tx,
        );
        drop(events_tx);
        let tmm = TrustModelManager::new(registry, config.v2x.node_ttl());
        let tam = TrustAssessmentManager::new(
            config,
            tmm,
            pool,
            transport,
            collaborators.crypto,
            collaborators.validator,
            internal_tx,
        );
        let task = tokio::spawn(tam.run(Channels { inbound, internal, events, shutdown }));
        Ok(Self { inbound: inbound_tx, shutdown: shutdown_tx, task })
    }

    /// Queues an inbound envelope, waiting while the queue is full.
    ///
    /// # Errors
    /// Returns [`EngineError::QueueClosed`] if the engine has stopped.
    pub async fn submit(&self, envelope: Envelope) -> Result<(), EngineError> {
        self.inbound.send(envelope).await.map_err(|_| EngineError::QueueClosed("inbound"))
    }

    /// A sender for feeding envelopes from other tasks.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.inbound.clone()
    }

    /// Stops accepting input, processes what is queued and waits for the
    /// workers to finish.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("engine already stopped");
        }
        drop(self.inbound);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "engine task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_fusion_is_not_available() {
        let mut config = EngineConfig::default();
        config.tlee.use_internal_tlee = false;
        assert!(matches!(Collaborators::from_config(&config), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn sending_after_shutdown_fails() {
        let (transport, _outbound) = ChannelTransport::new(4);
        let engine = match EngineHandle::start(EngineConfig::default(), TemplateRegistry::new(), Arc::new(transport)) {
            Ok(engine) => engine,
            Err(e) => panic!("engine failed to start: {e}"),
        };
        let sender = engine.sender();
        engine.shutdown().await;
        let envelope = match Envelope::new(MessageType::TasTmtDiscover, "app", &serde_json::json!({})) {
            Ok(e) => e,
            Err(e) => panic!("envelope: {e}"),
        };
        assert!(sender.send(envelope).await.is_err(), "inbound is closed once the engine stopped");
    }
}
