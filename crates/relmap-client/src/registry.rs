//! Registry of factories able to materialize collaborative objects by kind.

use crate::error::Result;
use crate::map::{SharedMap, MAP_KIND};
use crate::object::ObjectHandle;
use crate::services::ObjectServices;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Materializes one kind of collaborative object from its stored identity.
#[async_trait]
pub trait ObjectFactory: Send + Sync {
    /// The kind tag this factory answers for.
    fn kind(&self) -> &str;

    /// Load the object `id`, bound to the given services and registry.
    async fn load(
        &self,
        id: &str,
        services: Arc<ObjectServices>,
        registry: Arc<Registry>,
    ) -> Result<ObjectHandle>;
}

/// Lookup table from kind tag to factory.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn ObjectFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-populated with the factories this crate ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MapFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn ObjectFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    /// The factory for `kind`, if one is registered.
    pub fn get_extension(&self, kind: &str) -> Option<Arc<dyn ObjectFactory>> {
        self.factories.get(kind).cloned()
    }
}

/// Factory for nested shared maps.
pub struct MapFactory;

#[async_trait]
impl ObjectFactory for MapFactory {
    fn kind(&self) -> &str {
        MAP_KIND
    }

    async fn load(
        &self,
        id: &str,
        services: Arc<ObjectServices>,
        registry: Arc<Registry>,
    ) -> Result<ObjectHandle> {
        let map = SharedMap::load(id, services, registry).await?;
        Ok(map.handle())
    }
}
