use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Mapper<S, D> = Arc<dyn Fn(&S) -> D + Send + Sync>;

/// Registered entity-to-view mappings, keyed by source and destination type.
#[derive(Clone, Default)]
pub struct Projections {
    mappers: HashMap<(TypeId, TypeId), Arc<dyn Any + Send + Sync>>,
    names: Vec<(&'static str, &'static str)>,
}

impl Projections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the mapping from `S` to `D`.
    pub fn register<S: 'static, D: 'static>(
        mut self,
        map: impl Fn(&S) -> D + Send + Sync + 'static,
    ) -> Self {
        let mapper: Mapper<S, D> = Arc::new(map);
        let key = (TypeId::of::<S>(), TypeId::of::<D>());
        if self.mappers.insert(key, Arc::new(mapper)).is_none() {
            self.names.push((type_name::<S>(), type_name::<D>()));
        }
        self
    }

    pub fn exists<S: 'static, D: 'static>(&self) -> bool {
        self.mappers
            .contains_key(&(TypeId::of::<S>(), TypeId::of::<D>()))
    }

    pub fn mapper<S: 'static, D: 'static>(&self) -> Option<Mapper<S, D>> {
        self.mappers
            .get(&(TypeId::of::<S>(), TypeId::of::<D>()))
            .and_then(|m| m.downcast_ref::<Mapper<S, D>>())
            .cloned()
    }

    pub fn project<S: 'static, D: 'static>(&self, source: &S) -> Option<D> {
        self.mapper::<S, D>().map(|map| map(source))
    }
}

impl fmt::Debug for Projections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projections")
            .field("mappings", &self.names)
            .finish()
    }
}
