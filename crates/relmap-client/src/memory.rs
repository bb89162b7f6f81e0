//! In-memory sequencing service and blob storage for tests, demos and
//! simulation.
//!
//! One `MemorySequencer` plays the central server for any number of
//! documents and clients: submissions are stamped with a per-document total
//! order under the document lock and fanned out to every connected client,
//! including the submitter (that echo is the acknowledgement). The
//! collaboration-wide minimum sequence number is sampled from the connected
//! clients' reference-sequence callbacks at stamping time.

use crate::error::{ClientError, Result};
use crate::services::{
    ConnectRequest, DeltaConnection, DeltaService, DeltaSubmitter, ObjectStorage, RefSeqFn,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relmap_core::{Message, MessageKind, SequencedMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct ClientSub {
    client_id: String,
    tx: mpsc::UnboundedSender<SequencedMessage>,
    reference_sequence_number: RefSeqFn,
}

#[derive(Default)]
struct DocState {
    sequence_number: u64,
    next_client: u64,
    clients: Vec<ClientSub>,
}

#[derive(Default)]
struct SequencerInner {
    docs: Mutex<HashMap<String, DocState>>,
    history: Mutex<Vec<String>>,
}

/// Central in-memory sequencer. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct MemorySequencer {
    inner: Arc<SequencerInner>,
}

impl MemorySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current sequence number of a document (0 if unknown).
    pub fn sequence_number(&self, object_id: &str) -> u64 {
        self.inner
            .docs
            .lock()
            .get(object_id)
            .map(|doc| doc.sequence_number)
            .unwrap_or(0)
    }

    /// True if the document has ever been connected to.
    pub fn knows(&self, object_id: &str) -> bool {
        self.inner.docs.lock().contains_key(object_id)
    }

    /// Ordered record of `connect:<id>:<client>` and
    /// `submit:<id>:<client>:<cseq>` entries, for ordering assertions.
    pub fn history(&self) -> Vec<String> {
        self.inner.history.lock().clone()
    }
}

#[async_trait]
impl DeltaService for MemorySequencer {
    async fn connect(&self, request: ConnectRequest) -> Result<DeltaConnection> {
        let (tx, rx) = mpsc::unbounded_channel();

        let (existing, client_id) = {
            let mut docs = self.inner.docs.lock();
            let existing = docs.contains_key(&request.object_id);
            let doc = docs.entry(request.object_id.clone()).or_default();
            let client_id = format!("client-{}", doc.next_client);
            doc.next_client += 1;
            doc.clients.push(ClientSub {
                client_id: client_id.clone(),
                tx,
                reference_sequence_number: request.reference_sequence_number,
            });
            (existing, client_id)
        };

        self.inner
            .history
            .lock()
            .push(format!("connect:{}:{}", request.object_id, client_id));
        debug!(object_id = %request.object_id, %client_id, existing, "client connected");

        Ok(DeltaConnection {
            existing,
            client_id: client_id.clone(),
            submitter: Arc::new(MemorySubmitter {
                inner: self.inner.clone(),
                object_id: request.object_id,
                client_id,
            }),
            inbound: rx,
        })
    }
}

struct MemorySubmitter {
    inner: Arc<SequencerInner>,
    object_id: String,
    client_id: String,
}

#[async_trait]
impl DeltaSubmitter for MemorySubmitter {
    async fn submit(&self, message: Message) -> Result<()> {
        let mut docs = self.inner.docs.lock();
        let doc = docs
            .get_mut(&self.object_id)
            .ok_or_else(|| ClientError::Transport(format!("unknown document {}", self.object_id)))?;

        doc.sequence_number += 1;
        let minimum_sequence_number = doc
            .clients
            .iter()
            .map(|c| (c.reference_sequence_number)())
            .min()
            .unwrap_or(0);

        let sequenced = SequencedMessage {
            sequence_number: doc.sequence_number,
            minimum_sequence_number,
            client_id: self.client_id.clone(),
            kind: MessageKind::Operation,
            client_sequence_number: message.client_sequence_number,
            reference_sequence_number: message.reference_sequence_number,
            contents: message.op.to_contents(),
        };

        // Disconnected clients surface as closed channels; drop them.
        doc.clients
            .retain(|client| client.tx.send(sequenced.clone()).is_ok());

        self.inner.history.lock().push(format!(
            "submit:{}:{}:{}",
            self.object_id, self.client_id, message.client_sequence_number
        ));
        Ok(())
    }
}

/// In-memory blob storage. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn read(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(id).cloned())
    }

    async fn write(&self, id: &str, blob: Vec<u8>) -> Result<()> {
        self.blobs.write().insert(id.to_string(), blob);
        Ok(())
    }
}
