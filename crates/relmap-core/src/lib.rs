// File: `crates/relmap-core/src/lib.rs`
pub mod error;
pub mod op;
pub mod oplog;
pub mod snapshot;
pub mod state;
pub mod value;

pub use error::{CodecError, Result};
pub use op::{MapOperation, Message, MessageKind, SequencedMessage};
pub use oplog::OperationLog;
pub use snapshot::SnapshotBlob;
pub use state::MapState;
pub use value::{ObjectRef, StoredValue};
