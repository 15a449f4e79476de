//! Owned-properties tree extraction.
//!
//! Turns an eager-load specification into the tree of navigations the
//! reconciler walks and the session loads. Each node records whether the
//! navigation is a collection and how child rows point at their parent.
//! The tree is derived from model metadata alone and rebuilt on every call.

use std::collections::BTreeMap;

use crate::entity::Entity;
use crate::error::RepositoryError;
use crate::model::{Model, Navigation};
use crate::query::{Includes, Query};

/// One navigation step in an owned-properties tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedNode {
    /// Navigation name; the table name for the root.
    pub name: String,
    pub table: &'static str,
    pub collection: bool,
    /// `(child_field, parent_field)` pairs in declared key order.
    pub foreign_key: Vec<(&'static str, &'static str)>,
    pub children: BTreeMap<String, OwnedNode>,
}

impl OwnedNode {
    pub fn root(table: &'static str) -> Self {
        Self {
            name: table.to_string(),
            table,
            collection: false,
            foreign_key: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    fn from_navigation(nav: &Navigation) -> Self {
        Self {
            name: nav.name.to_string(),
            table: nav.target,
            collection: nav.collection,
            foreign_key: nav.foreign_key.clone(),
            children: BTreeMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&OwnedNode> {
        self.children.get(name)
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .values()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

/// Builds [`OwnedNode`] trees from eager-load paths.
pub struct OwnedPropertiesExtractor<'a> {
    model: &'a Model,
}

impl<'a> OwnedPropertiesExtractor<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    pub fn extract<E: Entity>(&self, query: &Query<E>) -> Result<OwnedNode, RepositoryError> {
        self.extract_includes(E::TABLE, query.includes())
    }

    /// Fails with a metadata error when a path names an unknown navigation.
    pub fn extract_includes(
        &self,
        table: &str,
        includes: &Includes,
    ) -> Result<OwnedNode, RepositoryError> {
        let root_type = self.model.entity_type(table)?;
        let mut root = OwnedNode::root(root_type.table());

        for path in includes.paths() {
            let mut node = &mut root;
            for step in path {
                let ty = self.model.entity_type(node.table)?;
                let nav = ty.navigation(step).ok_or_else(|| {
                    RepositoryError::metadata(format!(
                        "{} has no navigation named {}",
                        ty.name(),
                        step
                    ))
                })?;
                node = node
                    .children
                    .entry(nav.name.to_string())
                    .or_insert_with(|| OwnedNode::from_navigation(nav));
            }
        }

        Ok(root)
    }
}
