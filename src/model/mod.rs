//! Entity model - metadata for every registered entity type.
//!
//! The model is built once and shared by sessions. It answers the questions
//! the repository would otherwise need reflection for: which fields form the
//! key, which navigations exist and how children point at their parent, and
//! which capability fields (soft delete, tenant, audit, row version) a type has.
//!
//! ## Example
//!
//! ```ignore
//! let model = Model::builder()
//!     .register::<Company>()
//!     .register::<Department>()
//!     .build()?;
//! let ty = model.entity::<Company>()?;
//! assert_eq!(ty.key_fields(), &["id"]);
//! ```

mod entity_type;

use std::collections::HashMap;

use crate::entity::Entity;
use crate::error::RepositoryError;

pub use entity_type::{Capabilities, EntityType, EntityTypeBuilder, Navigation};

/// Registry of entity types keyed by table.
#[derive(Debug, Clone, Default)]
pub struct Model {
    types: HashMap<&'static str, EntityType>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder { types: Vec::new() }
    }

    pub fn entity_type(&self, table: &str) -> Result<&EntityType, RepositoryError> {
        self.types
            .get(table)
            .ok_or_else(|| RepositoryError::metadata(format!("table {} is not registered", table)))
    }

    pub fn entity<E: Entity>(&self) -> Result<&EntityType, RepositoryError> {
        self.entity_type(E::TABLE)
    }
}

pub struct ModelBuilder {
    types: Vec<EntityType>,
}

impl ModelBuilder {
    pub fn register<E: Entity>(mut self) -> Self {
        self.types.push(E::describe());
        self
    }

    pub fn entity_type(mut self, ty: EntityType) -> Self {
        self.types.push(ty);
        self
    }

    /// Validates keys and navigation targets.
    pub fn build(self) -> Result<Model, RepositoryError> {
        let mut types = HashMap::new();
        for ty in self.types {
            if ty.key_fields().is_empty() {
                return Err(RepositoryError::metadata(format!(
                    "{} declares no key fields",
                    ty.name()
                )));
            }
            if ty.generated_key() && ty.key_fields().len() != 1 {
                return Err(RepositoryError::metadata(format!(
                    "{} has a generated composite key",
                    ty.name()
                )));
            }
            if types.insert(ty.table(), ty.clone()).is_some() {
                return Err(RepositoryError::metadata(format!(
                    "table {} registered twice",
                    ty.table()
                )));
            }
        }

        for ty in types.values() {
            for nav in ty.navigations() {
                if !types.contains_key(nav.target) {
                    return Err(RepositoryError::metadata(format!(
                        "navigation {}.{} targets unregistered table {}",
                        ty.name(),
                        nav.name,
                        nav.target
                    )));
                }
            }
        }

        Ok(Model { types })
    }
}
