//! Collaborative object surface shared by everything a map can hold.

use crate::error::Result;
use crate::map::SharedMap;
use crate::registry::Registry;
use crate::services::ObjectServices;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

/// Shared handle on a live collaborative object.
pub type ObjectHandle = Arc<dyn CollaborativeObject>;

/// A replicated data type bound to an identity, a kind tag, and - once
/// attached - a transport.
///
/// Implemented by `SharedMap`; a host runtime can implement it for other
/// object types and register matching factories.
#[async_trait]
pub trait CollaborativeObject: Send + Sync {
    /// The object's identity in the collaboration.
    fn id(&self) -> &str;

    /// The kind tag naming this object's factory in the registry.
    fn kind(&self) -> &str;

    /// True iff the object has never been attached.
    fn is_local(&self) -> bool;

    /// Transition from local to attached, flushing buffered operations.
    async fn attach(&self, services: Arc<ObjectServices>, registry: Arc<Registry>) -> Result<()>;

    /// Downcast support, so callers can recover the concrete type behind a
    /// handle retrieved from a map.
    fn as_any(&self) -> &dyn Any;
}

/// What callers put into and get out of a map.
///
/// The explicit `Object` variant replaces a runtime capability probe: a
/// caller storing a collaborative object says so at the `set` boundary.
#[derive(Clone)]
pub enum Value {
    /// Opaque JSON payload, owned by the map.
    Plain(serde_json::Value),
    /// A live collaborative object; the map stores a reference to it.
    Object(ObjectHandle),
}

impl Value {
    pub fn plain(value: impl Into<serde_json::Value>) -> Self {
        Value::Plain(value.into())
    }

    pub fn object(handle: ObjectHandle) -> Self {
        Value::Object(handle)
    }

    pub fn as_plain(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Plain(v) => Some(v),
            Value::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Value::Object(h) => Some(h),
            Value::Plain(_) => None,
        }
    }

    /// The handle as a shared map, if that is what it is.
    pub fn as_map(&self) -> Option<&SharedMap> {
        self.as_object()
            .and_then(|h| h.as_any().downcast_ref::<SharedMap>())
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Plain(v) => f.debug_tuple("Plain").field(v).finish(),
            Value::Object(h) => f
                .debug_struct("Object")
                .field("kind", &h.kind())
                .field("id", &h.id())
                .finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Plain(a), Value::Plain(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Plain(value)
    }
}
