//! Snapshot blob - serialized map state plus the sequence it was taken at.
//!
//! The blob is an opaque serde_json document handed to the storage service:
//! `{ "sequenceNumber": S, "snapshot": { <key>: <StoredValue> } }`. It is a
//! value copy; mutating the live map after the snapshot was written never
//! changes the blob.

use crate::error::CodecError;
use crate::state::MapState;
use crate::value::StoredValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A snapshot of map state at a specific point in the server's total order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBlob {
    /// The server sequence applied when the snapshot was taken.
    pub sequence_number: u64,
    /// Deep copy of the entries.
    pub snapshot: HashMap<String, StoredValue>,
}

impl SnapshotBlob {
    /// Capture a value copy of `state` at `sequence_number`.
    pub fn capture(sequence_number: u64, state: &MapState) -> Self {
        Self {
            sequence_number,
            snapshot: state.to_entries(),
        }
    }

    /// Serialize to the wire blob.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a wire blob.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidSnapshot(e.to_string()))
    }

    /// Rebuild map state from the snapshot entries.
    pub fn into_state(self) -> MapState {
        MapState::from_entries(self.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_roundtrip() {
        let mut state = MapState::new();
        state.set("x", StoredValue::plain(json!("y")));
        state.set("child", StoredValue::reference("map", "m1"));

        let blob = SnapshotBlob::capture(5, &state);
        let bytes = blob.encode().unwrap();
        let decoded = SnapshotBlob::decode(&bytes).unwrap();

        assert_eq!(decoded.sequence_number, 5);
        let restored = decoded.into_state();
        assert_eq!(restored.get("x"), Some(&StoredValue::plain(json!("y"))));
        assert_eq!(
            restored.get("child"),
            Some(&StoredValue::reference("map", "m1"))
        );
    }

    #[test]
    fn test_capture_is_value_copy() {
        let mut state = MapState::new();
        state.set("x", StoredValue::plain(json!(1)));

        let blob = SnapshotBlob::capture(1, &state);
        state.set("x", StoredValue::plain(json!(2)));

        assert_eq!(blob.snapshot["x"], StoredValue::plain(json!(1)));
    }

    #[test]
    fn test_wire_field_names() {
        let blob = SnapshotBlob::capture(7, &MapState::new());
        let encoded = serde_json::to_value(&blob).unwrap();

        assert_eq!(encoded["sequenceNumber"], json!(7));
        assert_eq!(encoded["snapshot"], json!({}));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            SnapshotBlob::decode(b"not json"),
            Err(CodecError::InvalidSnapshot(_))
        ));
    }
}
