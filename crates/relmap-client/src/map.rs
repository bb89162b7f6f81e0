//! The shared map - a replicated key-value store ordered by a central
//! sequencer.
//!
//! A map starts *local*: mutations are applied immediately and buffered in
//! the operation log. Once attached, every local mutation is also submitted
//! to the sequencing service, and the service's echo retires the log head.
//! Inbound messages from other clients are applied in server order; the
//! adjacency of sequence numbers is a hard invariant of the transport.
//!
//! All engine state lives behind one `Arc`; `SharedMap` itself is a cheap
//! clone handle, the same shape the session/document layer of the SDK uses
//! elsewhere in this workspace.

use crate::error::{ClientError, Result};
use crate::object::{CollaborativeObject, ObjectHandle, Value};
use crate::registry::Registry;
use crate::services::{ConnectRequest, DeltaSubmitter, ObjectServices, RefSeqFn};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relmap_core::{
    MapOperation, MapState, Message, MessageKind, OperationLog, SequencedMessage, SnapshotBlob,
    StoredValue,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

/// Kind tag under which shared maps are registered.
pub const MAP_KIND: &str = "map";

/// Configuration for a shared map.
#[derive(Clone, Debug)]
pub struct MapConfig {
    /// Capacity of the change-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            event_capacity: 128,
        }
    }
}

/// Change events emitted after map state has been mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapEvent {
    /// A key was set or deleted, locally or remotely.
    ValueChanged { key: String },
    /// The map was cleared, locally or remotely.
    Clear,
}

/// Replication bookkeeping, guarded by one lock so sequence allocation, log
/// appends and optimistic applies stay atomic with respect to each other.
struct Replication {
    /// Highest server sequence applied.
    sequence_number: u64,
    /// Collaboration-wide low-water mark; threaded through, not consumed.
    minimum_sequence_number: u64,
    /// Next client-local sequence to allocate.
    client_sequence_number: u64,
    /// Assigned on connect; None while detached.
    client_id: Option<String>,
    log: OperationLog,
    attachment: Attachment,
    /// Latched description of the fault that halted the engine.
    fault: Option<String>,
}

impl Replication {
    fn check_fault(&self) -> Result<()> {
        match &self.fault {
            Some(fault) => Err(ClientError::Halted(fault.clone())),
            None => Ok(()),
        }
    }

    fn attached(&self) -> Option<&AttachedState> {
        match &self.attachment {
            Attachment::Attached(state) => Some(state),
            Attachment::Local => None,
        }
    }
}

enum Attachment {
    Local,
    Attached(AttachedState),
}

struct AttachedState {
    submitter: Arc<dyn DeltaSubmitter>,
    services: Arc<ObjectServices>,
    registry: Arc<Registry>,
}

/// A message queued for submission, with the nested object it references
/// (if any) so the drain can drive that object's attach first.
struct OutboundItem {
    message: Message,
    nested: Option<ObjectHandle>,
}

struct MapInner {
    id: String,
    repl: Mutex<Replication>,
    state: RwLock<MapState>,
    /// Live handles for nested objects referenced from this map.
    cache: RwLock<HashMap<String, ObjectHandle>>,
    /// Outbound messages awaiting submission, in issue order.
    pending: Mutex<VecDeque<OutboundItem>>,
    /// Serializes submission so outbound order always equals issue order,
    /// even across the suspension inside a nested attach.
    outbound: tokio::sync::Mutex<()>,
    events: broadcast::Sender<MapEvent>,
    ready: watch::Sender<bool>,
    duplicate_acks: AtomicU64,
}

/// A replicated, sequencer-ordered key-value map.
#[derive(Clone)]
pub struct SharedMap {
    inner: Arc<MapInner>,
}

impl SharedMap {
    /// Create a fresh local map with a generated id.
    pub fn new() -> Self {
        Self::with_parts(Ulid::new().to_string(), MapConfig::default(), true)
    }

    /// Create a fresh local map with an explicit id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::with_parts(id.into(), MapConfig::default(), true)
    }

    /// Create a fresh local map with explicit configuration.
    pub fn with_config(config: MapConfig) -> Self {
        Self::with_parts(Ulid::new().to_string(), config, true)
    }

    fn with_parts(id: String, config: MapConfig, ready: bool) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (ready_tx, _) = watch::channel(ready);
        Self {
            inner: Arc::new(MapInner {
                id,
                repl: Mutex::new(Replication {
                    sequence_number: 0,
                    minimum_sequence_number: 0,
                    client_sequence_number: 0,
                    client_id: None,
                    log: OperationLog::new(),
                    attachment: Attachment::Local,
                    fault: None,
                }),
                state: RwLock::new(MapState::new()),
                cache: RwLock::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                outbound: tokio::sync::Mutex::new(()),
                events,
                ready: ready_tx,
                duplicate_acks: AtomicU64::new(0),
            }),
        }
    }

    /// Open an existing document: connect, restore the latest snapshot, and
    /// begin attached.
    pub async fn load(
        id: impl Into<String>,
        services: Arc<ObjectServices>,
        registry: Arc<Registry>,
    ) -> Result<SharedMap> {
        let id = id.into();
        let map = Self::with_parts(id.clone(), MapConfig::default(), false);

        let connection = services
            .delta
            .connect(ConnectRequest {
                object_id: id.clone(),
                kind: MAP_KIND.to_string(),
                reference_sequence_number: map.reference_sequence_fn(),
            })
            .await?;

        let blob = if connection.existing {
            services.storage.read(&id).await?
        } else {
            None
        };

        {
            let mut repl = map.inner.repl.lock();
            if let Some(bytes) = blob {
                let snapshot = SnapshotBlob::decode(&bytes)?;
                repl.sequence_number = snapshot.sequence_number;
                *map.inner.state.write() = snapshot.into_state();
            }
            repl.client_id = Some(connection.client_id.clone());
            repl.attachment = Attachment::Attached(AttachedState {
                submitter: connection.submitter,
                services,
                registry,
            });
        }

        info!(id = %id, client_id = %connection.client_id, "loaded existing map");
        map.inner.ready.send_replace(true);
        map.spawn_inbound_pump(connection.inbound);
        Ok(map)
    }

    /// Transition from local to attached.
    ///
    /// Connects, publishes the object, then drains the operation log in
    /// order. Entries stay in the log until the service acknowledges them.
    pub async fn attach(
        &self,
        services: Arc<ObjectServices>,
        registry: Arc<Registry>,
    ) -> Result<()> {
        // Holding the outbound lock across the whole transition keeps any
        // concurrent mutation from submitting ahead of the buffered log.
        let _outbound = self.inner.outbound.lock().await;

        {
            let repl = self.inner.repl.lock();
            repl.check_fault()?;
            if repl.attached().is_some() {
                return Err(ClientError::AlreadyAttached);
            }
        }

        let connection = services
            .delta
            .connect(ConnectRequest {
                object_id: self.inner.id.clone(),
                kind: MAP_KIND.to_string(),
                reference_sequence_number: self.reference_sequence_fn(),
            })
            .await?;

        {
            let mut repl = self.inner.repl.lock();
            repl.client_id = Some(connection.client_id.clone());
            repl.attachment = Attachment::Attached(AttachedState {
                submitter: connection.submitter,
                services,
                registry,
            });

            let mut pending = self.inner.pending.lock();
            for message in repl.log.iter() {
                pending.push_back(OutboundItem {
                    nested: self.nested_handle_for(&message.op),
                    message: message.clone(),
                });
            }
        }

        info!(
            id = %self.inner.id,
            client_id = %connection.client_id,
            buffered = self.inner.pending.lock().len(),
            "attached map"
        );

        // Pump first: echoes of the drained entries arrive while later
        // entries are still being submitted, exactly as on a live transport.
        self.spawn_inbound_pump(connection.inbound);
        self.drain_pending().await?;
        Ok(())
    }

    /// The map's identity.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// True iff the map has never been attached.
    pub fn is_local(&self) -> bool {
        self.inner.repl.lock().attached().is_none()
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.inner.events.subscribe()
    }

    /// Shared trait-object handle on this map, for storing it in another
    /// collaborative object.
    pub fn handle(&self) -> ObjectHandle {
        Arc::new(self.clone())
    }

    /// Highest server sequence applied.
    pub fn sequence_number(&self) -> u64 {
        self.inner.repl.lock().sequence_number
    }

    /// Collaboration-wide low-water mark reported by the server.
    pub fn minimum_sequence_number(&self) -> u64 {
        self.inner.repl.lock().minimum_sequence_number
    }

    /// Identity assigned by the sequencing service; None while detached.
    pub fn client_id(&self) -> Option<String> {
        self.inner.repl.lock().client_id.clone()
    }

    /// Number of local operations not yet acknowledged.
    pub fn pending_ops(&self) -> usize {
        self.inner.repl.lock().log.len()
    }

    /// How many own-client echoes did not match the log head.
    pub fn duplicate_ack_count(&self) -> u64 {
        self.inner.duplicate_acks.load(Ordering::Relaxed)
    }

    /// Current decoded value at `key`, if any.
    ///
    /// Reference values resolve to live handles, materializing through the
    /// registry on first access.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ready().await;
        self.inner.repl.lock().check_fault()?;

        let stored = self.inner.state.read().get(key).cloned();
        match stored {
            None => Ok(None),
            Some(StoredValue::Plain(payload)) => Ok(Some(Value::Plain(payload))),
            Some(StoredValue::Collaborative(reference)) => {
                let handle = self.resolve_reference(&reference.kind, &reference.id).await?;
                Ok(Some(Value::Object(handle)))
            }
        }
    }

    /// Pure containment check.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.ready().await;
        self.inner.repl.lock().check_fault()?;
        Ok(self.inner.state.read().contains_key(key))
    }

    /// Snapshot of current keys. Order is unspecified.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.ready().await;
        self.inner.repl.lock().check_fault()?;
        Ok(self.inner.state.read().keys())
    }

    /// Set `key` to `value`.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let (stored, nested) = self.encode_value(value.into());
        let op = MapOperation::Set {
            key: key.into(),
            value: stored,
        };
        self.process_local_operation(op, nested).await
    }

    /// Delete `key`. Not an error if the key is absent.
    pub async fn delete(&self, key: impl Into<String>) -> Result<()> {
        let op = MapOperation::Delete { key: key.into() };
        self.process_local_operation(op, None).await
    }

    /// Replace the map with the empty map.
    pub async fn clear(&self) -> Result<()> {
        self.process_local_operation(MapOperation::Clear, None).await
    }

    /// Serialize current state plus sequence number and hand the blob to
    /// the storage service.
    pub async fn snapshot(&self) -> Result<()> {
        self.ready().await;

        let (blob, storage) = {
            let repl = self.inner.repl.lock();
            repl.check_fault()?;
            let attached = repl.attached().ok_or(ClientError::NotAttached)?;
            // Both locks held: the capture observes a consistent point,
            // never a partially applied message.
            let state = self.inner.state.read();
            (
                SnapshotBlob::capture(repl.sequence_number, &state),
                attached.services.storage.clone(),
            )
        };

        let bytes = blob.encode()?;
        storage.write(&self.inner.id, bytes).await?;
        debug!(id = %self.inner.id, sequence = blob.sequence_number, "wrote snapshot");
        Ok(())
    }

    /// Deliver one sequenced message from the transport.
    ///
    /// Messages must arrive in strict sequence order; a gap halts the
    /// engine, as does an unparseable operation payload.
    pub fn process_remote_message(&self, message: SequencedMessage) -> Result<()> {
        let mut repl = self.inner.repl.lock();
        repl.check_fault()?;

        let expected = repl.sequence_number + 1;
        if message.sequence_number != expected {
            let fault = ClientError::SequenceGap {
                expected,
                actual: message.sequence_number,
            };
            error!(id = %self.inner.id, %fault, "halting engine");
            repl.fault = Some(fault.to_string());
            return Err(fault);
        }

        repl.sequence_number = message.sequence_number;
        repl.minimum_sequence_number = message.minimum_sequence_number;

        if message.kind != MessageKind::Operation {
            return Ok(());
        }

        let op = match MapOperation::from_contents(&message.contents) {
            Ok(op) => op,
            Err(err) => {
                let fault = ClientError::UnknownOperation(err.to_string());
                error!(id = %self.inner.id, %fault, "halting engine");
                repl.fault = Some(fault.to_string());
                return Err(fault);
            }
        };

        if repl.client_id.as_deref() == Some(message.client_id.as_str()) {
            // Ack of one of our own ops: retire the head, never reapply.
            match repl.log.peek_head() {
                Some(head)
                    if head.client_sequence_number == message.client_sequence_number =>
                {
                    repl.log.pop_head();
                    debug!(
                        id = %self.inner.id,
                        cseq = message.client_sequence_number,
                        outstanding = repl.log.len(),
                        "retired acknowledged op"
                    );
                }
                _ => {
                    self.inner.duplicate_acks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        id = %self.inner.id,
                        cseq = message.client_sequence_number,
                        "duplicate ack did not match log head"
                    );
                }
            }
            return Ok(());
        }

        // Remote origin: apply under the replication lock so snapshots and
        // local ops serialize against it.
        self.apply_and_emit(&op);
        Ok(())
    }

    /// Local operation path: allocate a client sequence, log, apply
    /// optimistically, then submit through the serialized outbound queue.
    async fn process_local_operation(
        &self,
        op: MapOperation,
        nested: Option<ObjectHandle>,
    ) -> Result<()> {
        self.ready().await;

        let attached = {
            let mut repl = self.inner.repl.lock();
            repl.check_fault()?;

            let cseq = repl.client_sequence_number;
            repl.client_sequence_number += 1;
            let message = Message {
                client_sequence_number: cseq,
                reference_sequence_number: repl.sequence_number,
                op: op.clone(),
            };
            repl.log.push(message.clone());

            let attached = repl.attached().is_some();
            if attached {
                self.inner
                    .pending
                    .lock()
                    .push_back(OutboundItem { message, nested });
            }
            debug!(id = %self.inner.id, cseq, attached, "admitted local op");

            // Optimistic apply inside the critical section: local apply
            // order equals issue order, and the event fires before this
            // call ever suspends.
            self.apply_and_emit(&op);
            attached
        };

        if attached {
            self.flush_outbound().await?;
        }
        Ok(())
    }

    /// Apply an operation to map state and emit the matching event.
    fn apply_and_emit(&self, op: &MapOperation) {
        let event = {
            let mut state = self.inner.state.write();
            state.apply(op);
            match op {
                MapOperation::Set { key, .. } | MapOperation::Delete { key } => {
                    MapEvent::ValueChanged { key: key.clone() }
                }
                MapOperation::Clear => MapEvent::Clear,
            }
        };
        let _ = self.inner.events.send(event);
    }

    /// Encode a user value into its stored form, registering nested object
    /// handles in the cache.
    fn encode_value(&self, value: Value) -> (StoredValue, Option<ObjectHandle>) {
        match value {
            Value::Plain(payload) => (StoredValue::Plain(payload), None),
            Value::Object(handle) => {
                self.inner
                    .cache
                    .write()
                    .insert(handle.id().to_string(), handle.clone());
                let stored = StoredValue::reference(handle.kind(), handle.id());
                (stored, Some(handle))
            }
        }
    }

    /// Resolve a reference to a live handle, materializing through the
    /// registry on a cache miss.
    async fn resolve_reference(&self, kind: &str, id: &str) -> Result<ObjectHandle> {
        if let Some(handle) = self.inner.cache.read().get(id).cloned() {
            return Ok(handle);
        }

        let (services, registry) = {
            let repl = self.inner.repl.lock();
            let attached = repl.attached().ok_or(ClientError::NotAttached)?;
            (attached.services.clone(), attached.registry.clone())
        };
        let factory = registry
            .get_extension(kind)
            .ok_or_else(|| ClientError::UnknownKind(kind.to_string()))?;
        let handle = factory.load(id, services, registry.clone()).await?;

        // Another task may have materialized the same id meanwhile; keep
        // whichever handle landed first.
        let mut cache = self.inner.cache.write();
        Ok(cache.entry(id.to_string()).or_insert(handle).clone())
    }

    fn nested_handle_for(&self, op: &MapOperation) -> Option<ObjectHandle> {
        match op {
            MapOperation::Set { value, .. } => value
                .as_reference()
                .and_then(|r| self.inner.cache.read().get(&r.id).cloned()),
            _ => None,
        }
    }

    /// Submit everything queued, in order, under the outbound lock.
    async fn flush_outbound(&self) -> Result<()> {
        let _guard = self.inner.outbound.lock().await;
        self.drain_pending().await
    }

    /// Drain the pending queue. Caller must hold the outbound lock.
    async fn drain_pending(&self) -> Result<()> {
        loop {
            let item = self.inner.pending.lock().pop_front();
            let Some(item) = item else { return Ok(()) };

            let (submitter, services, registry) = {
                let repl = self.inner.repl.lock();
                match repl.attached() {
                    Some(attached) => (
                        attached.submitter.clone(),
                        attached.services.clone(),
                        attached.registry.clone(),
                    ),
                    None => return Ok(()),
                }
            };

            // A set carrying a reference to a still-local object must see
            // that object attached before the outer message is visible to
            // remote replicas.
            if let Some(nested) = &item.nested {
                if nested.is_local() {
                    nested.attach(services, registry).await?;
                }
            }

            submitter.submit(item.message).await?;
        }
    }

    fn reference_sequence_fn(&self) -> RefSeqFn {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move || {
            Weak::upgrade(&inner)
                .map(|inner| inner.repl.lock().sequence_number)
                .unwrap_or(0)
        })
    }

    /// Suspend until the initial load has completed.
    async fn ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn spawn_inbound_pump(&self, mut inbound: mpsc::UnboundedReceiver<SequencedMessage>) {
        let map = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if let Err(err) = map.process_remote_message(message) {
                    error!(id = %map.inner.id, %err, "inbound pump stopped");
                    break;
                }
            }
        });
    }
}

impl Default for SharedMap {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollaborativeObject for SharedMap {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn kind(&self) -> &str {
        MAP_KIND
    }

    fn is_local(&self) -> bool {
        SharedMap::is_local(self)
    }

    async fn attach(&self, services: Arc<ObjectServices>, registry: Arc<Registry>) -> Result<()> {
        SharedMap::attach(self, services, registry).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_read_your_writes() {
        let map = SharedMap::new();
        map.set("a", Value::plain(json!(1))).await.unwrap();

        assert_eq!(map.get("a").await.unwrap(), Some(Value::plain(json!(1))));
        assert!(map.has("a").await.unwrap());
        assert!(map.is_local());
    }

    #[tokio::test]
    async fn test_local_ops_buffer_in_log() {
        let map = SharedMap::new();
        map.set("a", Value::plain(json!(1))).await.unwrap();
        map.delete("a").await.unwrap();
        map.clear().await.unwrap();

        assert_eq!(map.pending_ops(), 3);
        assert_eq!(map.sequence_number(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let map = SharedMap::new();
        map.delete("ghost").await.unwrap();

        assert!(!map.has("ghost").await.unwrap());
        assert_eq!(map.pending_ops(), 1);
    }

    #[tokio::test]
    async fn test_keys_snapshot() {
        let map = SharedMap::new();
        map.set("a", Value::plain(json!(1))).await.unwrap();
        map.set("b", Value::plain(json!(2))).await.unwrap();

        let mut keys = map.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_events_fire_per_op() {
        let map = SharedMap::new();
        let mut events = map.subscribe();

        map.set("a", Value::plain(json!(1))).await.unwrap();
        map.delete("a").await.unwrap();
        map.clear().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            MapEvent::ValueChanged {
                key: "a".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MapEvent::ValueChanged {
                key: "a".to_string()
            }
        );
        assert_eq!(events.recv().await.unwrap(), MapEvent::Clear);
    }

    #[tokio::test]
    async fn test_snapshot_requires_services() {
        let map = SharedMap::new();
        assert!(matches!(
            map.snapshot().await,
            Err(ClientError::NotAttached)
        ));
    }

    #[tokio::test]
    async fn test_local_reference_resolves_from_cache() {
        let parent = SharedMap::new();
        let child = SharedMap::with_id("child-1");
        parent
            .set("child", Value::object(child.handle()))
            .await
            .unwrap();

        let value = parent.get("child").await.unwrap().unwrap();
        let handle = value.as_object().unwrap();
        assert_eq!(handle.id(), "child-1");
        assert_eq!(handle.kind(), MAP_KIND);
    }

    #[tokio::test]
    async fn test_sequence_gap_halts_engine() {
        let map = SharedMap::new();
        let message = SequencedMessage {
            sequence_number: 5,
            minimum_sequence_number: 0,
            client_id: "client-9".to_string(),
            kind: MessageKind::Operation,
            client_sequence_number: 0,
            reference_sequence_number: 0,
            contents: json!({"type": "clear"}),
        };

        assert!(matches!(
            map.process_remote_message(message),
            Err(ClientError::SequenceGap {
                expected: 1,
                actual: 5
            })
        ));
        // Every subsequent operation fails with the latched fault.
        assert!(matches!(
            map.get("a").await,
            Err(ClientError::Halted(_))
        ));
        assert!(matches!(
            map.set("a", Value::plain(json!(1))).await,
            Err(ClientError::Halted(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_operation_halts_engine() {
        let map = SharedMap::new();
        let message = SequencedMessage {
            sequence_number: 1,
            minimum_sequence_number: 0,
            client_id: "client-9".to_string(),
            kind: MessageKind::Operation,
            client_sequence_number: 0,
            reference_sequence_number: 0,
            contents: json!({"type": "increment", "key": "a"}),
        };

        assert!(matches!(
            map.process_remote_message(message),
            Err(ClientError::UnknownOperation(_))
        ));
        assert!(matches!(map.has("a").await, Err(ClientError::Halted(_))));
    }

    #[tokio::test]
    async fn test_non_operation_kind_consumes_sequence() {
        let map = SharedMap::new();
        let message = SequencedMessage {
            sequence_number: 1,
            minimum_sequence_number: 1,
            client_id: "client-9".to_string(),
            kind: MessageKind::NoOp,
            client_sequence_number: 0,
            reference_sequence_number: 0,
            contents: serde_json::Value::Null,
        };

        map.process_remote_message(message).unwrap();
        assert_eq!(map.sequence_number(), 1);
        assert_eq!(map.minimum_sequence_number(), 1);
        assert!(map.keys().await.unwrap().is_empty());
    }
}
