//! Protocol messages exchanged with the sequencing service.
//!
//! Wire format (serde_json, camelCase):
//! ```text
//! client → server   { clientSequenceNumber, referenceSequenceNumber, op }
//! server → clients  { sequenceNumber, minimumSequenceNumber, clientId,
//!                     type, clientSequenceNumber, referenceSequenceNumber,
//!                     contents }
//! ```
//!
//! `contents` stays loosely typed on the inbound side: the engine parses it
//! into a [`MapOperation`] itself so a schema violation is observable rather
//! than swallowed inside the transport.

use crate::error::CodecError;
use crate::value::StoredValue;
use serde::{Deserialize, Serialize};

/// A mutation of the map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MapOperation {
    /// Overwrite the slot at `key`.
    Set { key: String, value: StoredValue },
    /// Remove the slot at `key`. Not an error if the key is absent.
    Delete { key: String },
    /// Replace the map with the empty map.
    Clear,
}

impl MapOperation {
    /// Parse an operation out of a loosely typed inbound payload.
    pub fn from_contents(contents: &serde_json::Value) -> Result<Self, CodecError> {
        serde_json::from_value(contents.clone())
            .map_err(|e| CodecError::UnknownOperation(e.to_string()))
    }

    pub fn to_contents(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("map operations always serialize")
    }
}

/// A locally issued message awaiting sequencing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-local monotonic counter identifying this message.
    pub client_sequence_number: u64,
    /// The server sequence the client had observed when issuing.
    pub reference_sequence_number: u64,
    pub op: MapOperation,
}

/// Message kinds attached by the server.
///
/// The engine only interprets `Operation`; everything else consumes a
/// sequence number and is otherwise ignored at this layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Operation,
    NoOp,
}

/// A message stamped with the server's total order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedMessage {
    /// Position in the server's total order.
    pub sequence_number: u64,
    /// Collaboration-wide low-water mark reported by the server.
    pub minimum_sequence_number: u64,
    /// The client that issued the message.
    pub client_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub client_sequence_number: u64,
    pub reference_sequence_number: u64,
    /// Op payload, still named `op` on the wire; parsed by the engine via
    /// [`MapOperation::from_contents`].
    #[serde(rename = "op")]
    pub contents: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_wire_shape() {
        let op = MapOperation::Set {
            key: "a".to_string(),
            value: StoredValue::plain(json!(1)),
        };

        assert_eq!(
            op.to_contents(),
            json!({"type": "set", "key": "a", "value": {"type": "Plain", "value": 1}})
        );
    }

    #[test]
    fn test_delete_and_clear_wire_shape() {
        let delete = MapOperation::Delete {
            key: "a".to_string(),
        };
        assert_eq!(delete.to_contents(), json!({"type": "delete", "key": "a"}));

        let clear = MapOperation::Clear;
        assert_eq!(clear.to_contents(), json!({"type": "clear"}));
    }

    #[test]
    fn test_message_camel_case() {
        let msg = Message {
            client_sequence_number: 3,
            reference_sequence_number: 7,
            op: MapOperation::Clear,
        };
        let encoded = serde_json::to_value(&msg).unwrap();

        assert_eq!(encoded["clientSequenceNumber"], json!(3));
        assert_eq!(encoded["referenceSequenceNumber"], json!(7));
        assert_eq!(encoded["op"]["type"], json!("clear"));
    }

    #[test]
    fn test_op_roundtrip_through_contents() {
        let ops = vec![
            MapOperation::Set {
                key: "k".to_string(),
                value: StoredValue::reference("map", "m1"),
            },
            MapOperation::Delete {
                key: "k".to_string(),
            },
            MapOperation::Clear,
        ];

        for op in ops {
            let decoded = MapOperation::from_contents(&op.to_contents()).unwrap();
            assert_eq!(decoded, op);
        }
    }

    #[test]
    fn test_unknown_op_type_rejected() {
        let contents = json!({"type": "increment", "key": "a"});
        assert!(matches!(
            MapOperation::from_contents(&contents),
            Err(CodecError::UnknownOperation(_))
        ));
    }

    #[test]
    fn test_sequenced_message_wire_shape() {
        let msg = SequencedMessage {
            sequence_number: 10,
            minimum_sequence_number: 4,
            client_id: "client-0".to_string(),
            kind: MessageKind::Operation,
            client_sequence_number: 2,
            reference_sequence_number: 9,
            contents: json!({"type": "clear"}),
        };

        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["sequenceNumber"], json!(10));
        assert_eq!(encoded["minimumSequenceNumber"], json!(4));
        assert_eq!(encoded["clientId"], json!("client-0"));
        assert_eq!(encoded["type"], json!("Operation"));

        let decoded: SequencedMessage = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
