mod entity;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Entity)]
// ============================================================================

/// Derives `generic_repo::Entity` from `#[entity(...)]` attributes.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Entity)]
/// #[entity(table = "departments")]
/// pub struct Department {
///     #[entity(key, generated)]
///     pub id: i64,
///     pub company_id: i64,
///     #[entity(soft_delete)]
///     pub is_deleted: bool,
///     #[entity(version)]
///     pub row_version: u64,
///     #[entity(navigation(fk(department_id = id)))]
///     #[serde(default)]
///     pub teams: Vec<Team>,
/// }
/// ```
///
/// Struct attribute:
/// - `table = "..."`: defaults to the snake_case struct name plus `s`
///
/// Field attributes:
/// - `key`: part of the primary key; several `key` fields form a tuple key.
///   Without any, a field named `id` is the key
/// - `generated`: the store assigns the key on save
/// - `soft_delete`, `deleted_at`, `deleted_by`, `created_at`, `created_by`,
///   `modified_at`, `modified_by`, `tenant`, `version`: capability fields
/// - `navigation(fk(child_field = parent_field, ...))`: owned navigation on a
///   `Vec<T>` (collection) or `Option<T>` / `Option<Box<T>>` (reference) field.
///   `parent_field` names a field of this struct; `child_field` is the
///   serialized name of the field on `T`
///
/// Field names follow `#[serde(rename = "...")]` when present. A container
/// `#[serde(rename_all = "...")]` is rejected.
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    entity::derive_entity(input)
}
