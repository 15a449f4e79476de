use serde_json::{Map, Value};

use crate::entity::{key_string, Entity};

/// A navigation from a parent entity to owned children.
///
/// `foreign_key` pairs are `(child_field, parent_field)` in declared key order:
/// the child row points at its parent through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub name: &'static str,
    pub target: &'static str,
    pub collection: bool,
    pub foreign_key: Vec<(&'static str, &'static str)>,
}

/// Optional capability fields an entity may declare.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub soft_delete: Option<&'static str>,
    pub deleted_at: Option<&'static str>,
    pub deleted_by: Option<&'static str>,
    pub created_at: Option<&'static str>,
    pub created_by: Option<&'static str>,
    pub modified_at: Option<&'static str>,
    pub modified_by: Option<&'static str>,
    pub tenant: Option<&'static str>,
    pub version: Option<&'static str>,
}

/// Metadata describing one entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    name: &'static str,
    table: &'static str,
    key_fields: Vec<&'static str>,
    generated_key: bool,
    navigations: Vec<Navigation>,
    capabilities: Capabilities,
}

impl EntityType {
    pub fn builder(table: &'static str, name: &'static str) -> EntityTypeBuilder {
        EntityTypeBuilder {
            ty: EntityType {
                name,
                table,
                key_fields: Vec::new(),
                generated_key: false,
                navigations: Vec::new(),
                capabilities: Capabilities::default(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn key_fields(&self) -> &[&'static str] {
        &self.key_fields
    }

    pub fn generated_key(&self) -> bool {
        self.generated_key
    }

    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_navigation(&self, field: &str) -> bool {
        self.navigations.iter().any(|n| n.name == field)
    }

    /// Key field values of a row, `Null` for missing fields.
    pub fn key_values(&self, row: &Map<String, Value>) -> Vec<Value> {
        self.key_fields
            .iter()
            .map(|f| row.get(*f).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn key_of(&self, row: &Map<String, Value>) -> String {
        key_string(&self.key_values(row))
    }

    /// True when a generated key still holds its unset value (null or zero).
    pub fn has_unset_key(&self, row: &Map<String, Value>) -> bool {
        self.generated_key
            && self.key_values(row).iter().all(|v| match v {
                Value::Null => true,
                Value::Number(n) => n.as_i64() == Some(0),
                _ => false,
            })
    }

    pub fn version_of(&self, row: &Map<String, Value>) -> Option<u64> {
        self.capabilities
            .version
            .and_then(|f| row.get(f))
            .and_then(Value::as_u64)
    }

    /// The row without navigation fields.
    pub fn scalar_row(&self, graph: &Map<String, Value>) -> Map<String, Value> {
        graph
            .iter()
            .filter(|(k, _)| !self.is_navigation(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copies scalar values from `incoming` onto `existing` in place.
    ///
    /// Creation audit fields and the tenant column keep their persisted values.
    pub fn copy_values(&self, incoming: &Map<String, Value>, existing: &mut Map<String, Value>) {
        let caps = &self.capabilities;
        let protected = [caps.created_at, caps.created_by, caps.tenant];
        for (field, value) in incoming {
            if self.is_navigation(field) || protected.iter().any(|p| *p == Some(field.as_str())) {
                continue;
            }
            existing.insert(field.clone(), value.clone());
        }
    }
}

/// Builder returned by [`EntityType::builder`].
pub struct EntityTypeBuilder {
    ty: EntityType,
}

impl EntityTypeBuilder {
    pub fn key(mut self, fields: &[&'static str]) -> Self {
        self.ty.key_fields = fields.to_vec();
        self
    }

    /// Keys are assigned by the store on save.
    pub fn generated_key(mut self) -> Self {
        self.ty.generated_key = true;
        self
    }

    pub fn collection<T: Entity>(
        self,
        name: &'static str,
        foreign_key: &[(&'static str, &'static str)],
    ) -> Self {
        self.navigation(name, T::TABLE, true, foreign_key)
    }

    pub fn reference<T: Entity>(
        self,
        name: &'static str,
        foreign_key: &[(&'static str, &'static str)],
    ) -> Self {
        self.navigation(name, T::TABLE, false, foreign_key)
    }

    pub fn navigation(
        mut self,
        name: &'static str,
        target: &'static str,
        collection: bool,
        foreign_key: &[(&'static str, &'static str)],
    ) -> Self {
        self.ty.navigations.push(Navigation {
            name,
            target,
            collection,
            foreign_key: foreign_key.to_vec(),
        });
        self
    }

    pub fn soft_delete(mut self, field: &'static str) -> Self {
        self.ty.capabilities.soft_delete = Some(field);
        self
    }

    pub fn deleted_at(mut self, field: &'static str) -> Self {
        self.ty.capabilities.deleted_at = Some(field);
        self
    }

    pub fn deleted_by(mut self, field: &'static str) -> Self {
        self.ty.capabilities.deleted_by = Some(field);
        self
    }

    pub fn created_at(mut self, field: &'static str) -> Self {
        self.ty.capabilities.created_at = Some(field);
        self
    }

    pub fn created_by(mut self, field: &'static str) -> Self {
        self.ty.capabilities.created_by = Some(field);
        self
    }

    pub fn modified_at(mut self, field: &'static str) -> Self {
        self.ty.capabilities.modified_at = Some(field);
        self
    }

    pub fn modified_by(mut self, field: &'static str) -> Self {
        self.ty.capabilities.modified_by = Some(field);
        self
    }

    pub fn tenant(mut self, field: &'static str) -> Self {
        self.ty.capabilities.tenant = Some(field);
        self
    }

    pub fn version(mut self, field: &'static str) -> Self {
        self.ty.capabilities.version = Some(field);
        self
    }

    pub fn build(self) -> EntityType {
        self.ty
    }
}
