//! Entity descriptors.
//!
//! Every persisted type implements [`Entity`], usually through
//! `#[derive(Entity)]`. The descriptor names the table, the key and the
//! [`EntityType`] metadata (owned navigations and optional capabilities such
//! as soft delete, tenancy and row versions) that drives the generic
//! repository without reflection.
//!
//! ## Example
//!
//! ```ignore
//! use generic_repo::Entity;
//!
//! #[derive(Clone, Serialize, Deserialize, Entity)]
//! #[entity(table = "companies")]
//! struct Company {
//!     #[entity(key, generated)]
//!     pub id: i64,
//!     pub name: String,
//!     #[entity(navigation(fk(company_id = id)))]
//!     #[serde(default)]
//!     pub departments: Vec<Department>,
//! }
//! ```

mod accessor;
mod key;

use serde::{de::DeserializeOwned, Serialize};

use crate::model::EntityType;

pub use accessor::KeyAccessor;
pub(crate) use accessor::KeyCell;
pub use key::{key_string, PrimaryKey, ScalarKey};

/// A persisted record with a primary key.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table (collection) the rows of this type live in.
    const TABLE: &'static str;

    type Key: PrimaryKey;

    fn key(&self) -> Self::Key;

    /// Metadata for this type. Called once when the model is built.
    fn describe() -> EntityType;

    /// Type name used in error messages.
    fn type_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Shorthand for an entity's key type.
pub type KeyOf<E> = <E as Entity>::Key;
