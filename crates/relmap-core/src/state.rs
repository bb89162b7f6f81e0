//! Map state - the key to stored-value store.
//!
//! Pure data: mutation primitives return enough for the engine layer to
//! decide which change event to emit. Insertion order is not observable.

use crate::op::MapOperation;
use crate::value::StoredValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The replicated key-value state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    entries: HashMap<String, StoredValue>,
}

impl MapState {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn from_entries(entries: HashMap<String, StoredValue>) -> Self {
        Self { entries }
    }

    /// Overwrite the slot at `key`.
    pub fn set(&mut self, key: impl Into<String>, value: StoredValue) {
        self.entries.insert(key.into(), value);
    }

    /// Remove the slot at `key`; returns whether a slot existed.
    ///
    /// Deleting a missing key is deliberately not an error, so remote
    /// deletes stay idempotent against concurrent local clears.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Replace the map with the empty map.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply an already-decoded operation.
    pub fn apply(&mut self, op: &MapOperation) {
        match op {
            MapOperation::Set { key, value } => self.set(key.clone(), value.clone()),
            MapOperation::Delete { key } => {
                self.delete(key);
            }
            MapOperation::Clear => self.clear(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&StoredValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of current keys. Order is unspecified.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value copy of the entries, for snapshotting.
    pub fn to_entries(&self) -> HashMap<String, StoredValue> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get() {
        let mut state = MapState::new();
        state.set("a", StoredValue::plain(json!(1)));

        assert_eq!(state.get("a"), Some(&StoredValue::plain(json!(1))));
        assert!(state.contains_key("a"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_set_overwrites() {
        let mut state = MapState::new();
        state.set("a", StoredValue::plain(json!(1)));
        state.set("a", StoredValue::plain(json!(2)));

        assert_eq!(state.get("a"), Some(&StoredValue::plain(json!(2))));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut state = MapState::new();
        assert!(!state.delete("absent"));

        state.set("a", StoredValue::plain(json!(1)));
        assert!(state.delete("a"));
        assert!(!state.contains_key("a"));
    }

    #[test]
    fn test_clear() {
        let mut state = MapState::new();
        state.set("a", StoredValue::plain(json!(1)));
        state.set("b", StoredValue::plain(json!(2)));

        state.clear();
        assert!(state.is_empty());
        assert!(state.keys().is_empty());
    }

    #[test]
    fn test_apply_ops() {
        let mut state = MapState::new();
        state.apply(&MapOperation::Set {
            key: "a".to_string(),
            value: StoredValue::plain(json!("x")),
        });
        state.apply(&MapOperation::Set {
            key: "b".to_string(),
            value: StoredValue::plain(json!("y")),
        });
        state.apply(&MapOperation::Delete {
            key: "a".to_string(),
        });

        assert!(!state.contains_key("a"));
        assert!(state.contains_key("b"));

        state.apply(&MapOperation::Clear);
        assert!(state.is_empty());
    }

    #[test]
    fn test_to_entries_is_value_copy() {
        let mut state = MapState::new();
        state.set("a", StoredValue::plain(json!(1)));

        let copied = state.to_entries();
        state.set("a", StoredValue::plain(json!(2)));

        assert_eq!(copied["a"], StoredValue::plain(json!(1)));
    }
}
