//! Fixed set of shard workers.
//!
//! Every command for a given instance hashes to the same shard, so its
//! updates are applied in dispatch order by a single owner.

use std::sync::Arc;

use taf_core::{fnv1a_32, FullTmiId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::fusion::FusionEngine;
use crate::worker::{Worker, WorkerCommand, WorkerEvent};
use crate::EngineError;

/// Shard owning `key` among `shards` workers.
#[must_use]
pub fn shard_for(key: &str, shards: usize) -> usize {
    let count = u32::try_from(shards.max(1)).unwrap_or(u32::MAX);
    usize::try_from(fnv1a_32(key.as_bytes()) % count).unwrap_or_default()
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<WorkerCommand>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `shards` workers with queues of `capacity` commands each.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        shards: usize,
        capacity: usize,
        fusion: &Arc<dyn FusionEngine>,
        events: &mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let shards = shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        let mut handles = Vec::with_capacity(shards);
        for shard in 0..shards {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            let worker = Worker::new(shard, Arc::clone(fusion), events.clone());
            handles.push(tokio::spawn(worker.run(rx)));
            senders.push(tx);
        }
        tracing::info!(shards, capacity, "worker pool started");
        Self { senders, handles }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    #[must_use]
    pub fn shard_of(&self, tmi: &FullTmiId) -> usize {
        shard_for(&tmi.to_string(), self.senders.len())
    }

    /// Queues a command on the owning shard, waiting while its queue is full.
    ///
    /// # Errors
    /// Returns [`EngineError::QueueClosed`] if the worker has stopped.
    pub async fn dispatch(&self, command: WorkerCommand) -> Result<(), EngineError> {
        let shard = self.shard_of(command.tmi());
        let sender = self.senders.get(shard).ok_or(EngineError::QueueClosed("worker"))?;
        sender.send(command).await.map_err(|_| EngineError::QueueClosed("worker"))
    }

    /// Closes every queue and waits for the workers to drain them. Later
    /// dispatches fail with [`EngineError::QueueClosed`].
    pub async fn shutdown(&mut self) {
        self.senders.clear();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
        tracing::info!("worker pool stopped");
    }
}
