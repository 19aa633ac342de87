//! Error types for the engine crate.

use taf_core::{CoreError, SessionId, TmiId, TrustSource};

use crate::session::SessionState;

/// Errors surfaced by the engine to clients or to the embedding process.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No template is registered under this `name@version`.
    #[error("unknown trust model template: {0}")]
    UnknownTemplate(String),

    /// Session does not exist (or was already torn down).
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session exists but cannot accept the request in its current state.
    #[error("session {session} is {state}")]
    SessionState { session: SessionId, state: SessionState },

    /// A trust source subscription was refused or could not be requested.
    #[error("subscription to {trust_source} failed: {reason}")]
    SubscriptionFailed { trust_source: TrustSource, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fusion(#[from] FusionError),

    /// A worker or manager queue was closed while sending to it.
    #[error("{0} queue closed")]
    QueueClosed(&'static str),

    /// Configuration value out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Errors from a [`Transport`](crate::transport::Transport).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The receiving side has gone away.
    #[error("transport closed")]
    Closed,

    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a [`FusionEngine`](crate::fusion::FusionEngine).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum FusionError {
    /// The structure has no node without incoming edges.
    #[error("trust graph of {tmi} has no root")]
    MissingRoot { tmi: TmiId },

    /// An operator produced an invalid opinion.
    #[error("fusion of {tmi} failed: {reason}")]
    Operator { tmi: TmiId, reason: String },
}
