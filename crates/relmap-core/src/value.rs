//! Stored values - the tagged sum a map slot holds on the wire.
//!
//! A slot either owns an opaque JSON payload outright, or it points at
//! another collaborative object by kind tag and id. The pointed-to object is
//! not owned by the map; resolving the pointer back into a live handle is
//! the engine's job.

use serde::{Deserialize, Serialize};

/// A pointer to another collaborative object.
///
/// `kind` names the factory able to materialize the object; `id` is the
/// object's identity in the collaboration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub id: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// The wire form of a value stored in the map.
///
/// Serializes as `{ "type": "Plain"|"Collaborative", "value": ... }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum StoredValue {
    /// Opaque JSON-compatible payload, owned by the map.
    Plain(serde_json::Value),
    /// Weak logical reference to another collaborative object.
    Collaborative(ObjectRef),
}

impl StoredValue {
    /// Build a plain value from anything JSON-compatible.
    pub fn plain(value: impl Into<serde_json::Value>) -> Self {
        StoredValue::Plain(value.into())
    }

    /// Build a reference value.
    pub fn reference(kind: impl Into<String>, id: impl Into<String>) -> Self {
        StoredValue::Collaborative(ObjectRef::new(kind, id))
    }

    /// True if this slot points at another collaborative object.
    pub fn is_reference(&self) -> bool {
        matches!(self, StoredValue::Collaborative(_))
    }

    /// The reference, if this slot holds one.
    pub fn as_reference(&self) -> Option<&ObjectRef> {
        match self {
            StoredValue::Collaborative(r) => Some(r),
            StoredValue::Plain(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_wire_shape() {
        let value = StoredValue::plain(json!({"a": 1}));
        let encoded = serde_json::to_value(&value).unwrap();

        assert_eq!(encoded, json!({"type": "Plain", "value": {"a": 1}}));
    }

    #[test]
    fn test_reference_wire_shape() {
        let value = StoredValue::reference("map", "child-1");
        let encoded = serde_json::to_value(&value).unwrap();

        assert_eq!(
            encoded,
            json!({"type": "Collaborative", "value": {"kind": "map", "id": "child-1"}})
        );
    }

    #[test]
    fn test_roundtrip() {
        let values = vec![
            StoredValue::plain(json!(42)),
            StoredValue::plain(json!("text")),
            StoredValue::plain(serde_json::Value::Null),
            StoredValue::reference("map", "m1"),
        ];

        for value in values {
            let encoded = serde_json::to_string(&value).unwrap();
            let decoded: StoredValue = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_as_reference() {
        let reference = StoredValue::reference("map", "m1");
        assert!(reference.is_reference());
        assert_eq!(reference.as_reference().unwrap().id, "m1");

        let plain = StoredValue::plain(json!(1));
        assert!(!plain.is_reference());
        assert!(plain.as_reference().is_none());
    }
}
