//! Service abstractions consumed by the engine once attached.
//!
//! The delta service sequences outbound messages and pushes sequenced
//! messages back in strict order; the storage service holds opaque snapshot
//! blobs. Both are exclusively held by the engine after `attach`.

use crate::error::Result;
use async_trait::async_trait;
use relmap_core::{Message, SequencedMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// On-demand callback returning the engine's current sequence number.
///
/// The sequencing service samples this when stamping messages, e.g. to
/// compute the collaboration-wide minimum sequence number.
pub type RefSeqFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Connection request for one collaborative object.
pub struct ConnectRequest {
    pub object_id: String,
    pub kind: String,
    pub reference_sequence_number: RefSeqFn,
}

/// An established connection to the sequencing service.
pub struct DeltaConnection {
    /// True if the document was already known to the service.
    pub existing: bool,
    /// Identity assigned to this client for the connection's lifetime.
    pub client_id: String,
    /// Outbound half.
    pub submitter: Arc<dyn DeltaSubmitter>,
    /// Inbound half: sequenced messages in strict sequence order.
    pub inbound: mpsc::UnboundedReceiver<SequencedMessage>,
}

/// Factory for per-object connections to the sequencing service.
#[async_trait]
pub trait DeltaService: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<DeltaConnection>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait DeltaSubmitter: Send + Sync {
    async fn submit(&self, message: Message) -> Result<()>;
}

/// Opaque blob storage for snapshots.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Read the blob for `id`, if one was ever written.
    async fn read(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Write (or overwrite) the blob for `id`.
    async fn write(&self, id: &str, blob: Vec<u8>) -> Result<()>;
}

/// The service bundle a collaborative object is bound to on attach.
///
/// Nested objects are attached against the parent's bundle, so a whole
/// object graph shares one transport and one store.
pub struct ObjectServices {
    pub delta: Arc<dyn DeltaService>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl ObjectServices {
    pub fn new(delta: Arc<dyn DeltaService>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { delta, storage }
    }
}
