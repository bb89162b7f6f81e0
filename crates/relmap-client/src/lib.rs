//! relmap client - replication engine for sequencer-ordered collaborative
//! maps.
//!
//! Multiple clients mutate a shared key-value map concurrently; a central
//! sequencing service imposes a total order on their operations, and each
//! replica converges by applying operations in that order. Local mutations
//! apply optimistically and are reconciled when the server's echo
//! acknowledges them.
//!
//! # Quick start
//!
//! ```no_run
//! use relmap_client::{MemorySequencer, MemoryStorage, ObjectServices, Registry, SharedMap, Value};
//! use std::sync::Arc;
//!
//! # async fn demo() -> relmap_client::Result<()> {
//! let sequencer = MemorySequencer::new();
//! let services = Arc::new(ObjectServices::new(
//!     Arc::new(sequencer.clone()),
//!     Arc::new(MemoryStorage::new()),
//! ));
//! let registry = Arc::new(Registry::with_defaults());
//!
//! let map = SharedMap::new();
//! map.set("greeting", Value::plain("hello")).await?;
//! map.attach(services, registry).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`map`] - the `SharedMap` replication engine
//! - [`object`] - the collaborative-object trait and user-facing values
//! - [`registry`] - factories materializing nested objects by kind tag
//! - [`services`] - delta transport and blob storage abstractions
//! - [`memory`] - in-memory sequencer and storage for tests and demos
//! - [`error`] - error types

pub mod error;
pub mod map;
pub mod memory;
pub mod object;
pub mod registry;
pub mod services;

// Re-exports for convenience
pub use error::{ClientError, Result};
pub use map::{MapConfig, MapEvent, SharedMap, MAP_KIND};
pub use memory::{MemorySequencer, MemoryStorage};
pub use object::{CollaborativeObject, ObjectHandle, Value};
pub use registry::{MapFactory, ObjectFactory, Registry};
pub use services::{
    ConnectRequest, DeltaConnection, DeltaService, DeltaSubmitter, ObjectServices, ObjectStorage,
    RefSeqFn,
};

// Re-export commonly used wire types from relmap-core
pub use relmap_core::{
    MapOperation, Message, MessageKind, SequencedMessage, SnapshotBlob, StoredValue,
};
