//! Error types for the replication engine.

use thiserror::Error;

/// Errors surfaced by map operations and the services behind them.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// An inbound message broke the server's total order. Fatal; the
    /// transport contract guarantees adjacency.
    #[error("Sequence gap: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    /// An inbound op payload was not one of set/delete/clear. Fatal.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A reference value names a kind the registry has no factory for.
    #[error("Unknown object kind: {0}")]
    UnknownKind(String),

    /// `attach` called on an already attached object.
    #[error("Object is already attached")]
    AlreadyAttached,

    /// The operation needs transport or storage services, but the object
    /// was never attached.
    #[error("Object is not attached")]
    NotAttached,

    /// A previous invariant violation halted the engine.
    #[error("Engine halted: {0}")]
    Halted(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<relmap_core::CodecError> for ClientError {
    fn from(err: relmap_core::CodecError) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
