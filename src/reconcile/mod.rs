//! Aggregate reconciliation.
//!
//! Walks an existing (persisted, tracked) graph and an incoming (detached)
//! graph in lockstep along an owned-properties tree and stages the inserts,
//! updates and deletes that turn one into the other. Children are matched
//! strictly by primary key; foreign keys on incoming children are always
//! rewritten to point at their parent before matching.
//!
//! Graphs are handled in their serialized row form so one algorithm serves
//! every entity shape the model describes.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::error::RepositoryError;
use crate::model::Model;
use crate::owned::OwnedNode;
use crate::session::{ChangeTracker, Entry, EntryId, EntryState};
use crate::store::Row;

type ParentLink<'n> = (EntryId, &'n [(&'static str, &'static str)]);

/// Stages the differences between two graphs into a change tracker.
pub struct Reconciler<'a> {
    model: &'a Model,
    tracker: &'a mut ChangeTracker,
}

impl<'a> Reconciler<'a> {
    pub fn new(model: &'a Model, tracker: &'a mut ChangeTracker) -> Self {
        Self { model, tracker }
    }

    /// Reconciles `incoming` into `existing`, or stages it as new when there
    /// is no existing graph. Returns the tracker entry of the root.
    ///
    /// `existing` is updated in place: scalar values are copied over and each
    /// owned collection ends up holding the retained children followed by the
    /// new ones. `incoming` receives temporary keys and rewritten foreign keys.
    pub fn reconcile(
        &mut self,
        existing: Option<&mut Row>,
        incoming: &mut Row,
        tree: &OwnedNode,
    ) -> Result<EntryId, RepositoryError> {
        let id = self.reconcile_node(existing, incoming, tree, None)?;
        debug!(table = tree.table, owned = tree.descendant_count(), "reconciled aggregate");
        Ok(id)
    }

    /// Stages `graph` and the owned descendants it carries for deletion.
    pub fn remove(&mut self, graph: &Row, tree: &OwnedNode) -> Result<EntryId, RepositoryError> {
        let id = self.stage_removal(graph, tree, None)?;
        debug!(table = tree.table, "staged aggregate removal");
        Ok(id)
    }

    fn reconcile_node(
        &mut self,
        mut existing: Option<&mut Row>,
        incoming: &mut Row,
        node: &OwnedNode,
        parent: Option<ParentLink<'_>>,
    ) -> Result<EntryId, RepositoryError> {
        let model = self.model;
        let ty = model.entity_type(node.table)?;

        let id = match existing.as_deref_mut() {
            None => self.tracker.add(ty, incoming)?,
            Some(current) => {
                let key = ty.key_of(current);
                let id = match self.tracker.find_id_for(ty, &key) {
                    Some(id) => id,
                    None => self.tracker.attach(ty, ty.scalar_row(current)),
                };
                ty.copy_values(incoming, current);
                self.tracker.set_values(id, ty.scalar_row(current));
                if let Some(version) = ty.version_of(incoming) {
                    self.tracker.set_original_version(id, Some(version));
                }
                id
            }
        };

        if let Some((parent_id, pairs)) = parent {
            self.tracker.link(id, parent_id, pairs.to_vec());
        }

        let parent_values = match existing.as_deref() {
            Some(current) => ty.scalar_row(current),
            None => ty.scalar_row(incoming),
        };

        for child in node.children.values() {
            let child_ty = model.entity_type(child.table)?;
            let mut incoming_children = take_navigation(incoming, &child.name);
            let mut existing_children = match existing.as_deref_mut() {
                Some(current) => take_navigation(current, &child.name),
                None => Vec::new(),
            };

            let index: HashMap<String, usize> = existing_children
                .iter()
                .enumerate()
                .map(|(pos, row)| (child_ty.key_of(row), pos))
                .collect();
            let mut retained = vec![false; existing_children.len()];
            let mut inserted = Vec::new();

            for (pos, incoming_child) in incoming_children.iter_mut().enumerate() {
                for (child_field, parent_field) in &child.foreign_key {
                    let value = parent_values.get(*parent_field).cloned().unwrap_or(Value::Null);
                    incoming_child.insert(child_field.to_string(), value);
                }

                let link = Some((id, child.foreign_key.as_slice()));
                match index.get(&child_ty.key_of(incoming_child)).copied() {
                    Some(existing_pos) => {
                        retained[existing_pos] = true;
                        let existing_child = &mut existing_children[existing_pos];
                        self.reconcile_node(Some(existing_child), incoming_child, child, link)?;
                    }
                    None => {
                        self.reconcile_node(None, incoming_child, child, link)?;
                        inserted.push(pos);
                    }
                }
            }

            for (pos, existing_child) in existing_children.iter().enumerate() {
                if !retained[pos] {
                    self.stage_removal(existing_child, child, Some(id))?;
                }
            }

            if let Some(current) = existing.as_deref_mut() {
                let inserted: HashSet<usize> = inserted.into_iter().collect();
                let members: Vec<Row> = existing_children
                    .into_iter()
                    .zip(retained)
                    .filter(|(_, kept)| *kept)
                    .map(|(row, _)| row)
                    .chain(
                        incoming_children
                            .iter()
                            .enumerate()
                            .filter(|(pos, _)| inserted.contains(pos))
                            .map(|(_, row)| row.clone()),
                    )
                    .collect();
                put_navigation(current, child, members);
            }
            put_navigation(incoming, child, incoming_children);
        }

        Ok(id)
    }

    /// Stages a removed child and its loaded owned descendants for deletion.
    fn stage_removal(
        &mut self,
        row: &Row,
        node: &OwnedNode,
        parent: Option<EntryId>,
    ) -> Result<EntryId, RepositoryError> {
        let model = self.model;
        let ty = model.entity_type(node.table)?;
        let key = ty.key_of(row);
        let id = match self.tracker.find_id_for(ty, &key) {
            Some(id) => id,
            None => self.tracker.attach(ty, ty.scalar_row(row)),
        };
        self.tracker.remove(id);
        if let Some(parent) = parent {
            self.tracker.link(id, parent, node.foreign_key.clone());
        }

        for child in node.children.values() {
            for grandchild in navigation_items(row, &child.name) {
                self.stage_removal(grandchild, child, Some(id))?;
            }
        }
        Ok(id)
    }
}

/// True when the root or any owned descendant of `graph` (including children
/// already staged for removal) has pending changes. Mutates nothing.
pub fn is_graph_modified(
    model: &Model,
    tracker: &ChangeTracker,
    tree: &OwnedNode,
    graph: &Row,
) -> Result<bool, RepositoryError> {
    let ty = model.entity_type(tree.table)?;
    if let Some(id) = tracker.find_id_for(ty, &ty.key_of(graph)) {
        if tracker.entry(id).map(Entry::state).is_some_and(|s| s.is_pending()) {
            return Ok(true);
        }
        if tracker.has_pending_dependents(id) {
            return Ok(true);
        }
    }

    for child in tree.children.values() {
        for item in navigation_items(graph, &child.name) {
            if is_graph_modified(model, tracker, child, item)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// The session's view of a loaded graph: tracked rows carry their staged
/// values, rows staged for deletion drop out and tracked rows whose foreign
/// key points at a parent join that parent's navigation. `None` when the root
/// itself is staged for deletion.
///
/// Reconciling against this view lets a graph be updated more than once
/// before it is saved.
pub fn current_graph(
    model: &Model,
    tracker: &ChangeTracker,
    node: &OwnedNode,
    mut graph: Row,
) -> Result<Option<Row>, RepositoryError> {
    let ty = model.entity_type(node.table)?;
    if let Some(entry) = tracker
        .find_id_for(ty, &ty.key_of(&graph))
        .and_then(|id| tracker.entry(id))
    {
        match entry.state() {
            EntryState::Deleted | EntryState::Detached => return Ok(None),
            _ => graph.extend(entry.row().clone()),
        }
    }

    for child in node.children.values() {
        let child_ty = model.entity_type(child.table)?;
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for item in take_navigation(&mut graph, &child.name) {
            seen.insert(child_ty.key_of(&item));
            if let Some(item) = current_graph(model, tracker, child, item)? {
                members.push(item);
            }
        }

        let staged: Vec<Row> = tracker
            .entries()
            .filter(|e| e.table() == child.table && e.state() != EntryState::Deleted)
            .filter(|e| references(e.row(), &graph, &child.foreign_key))
            .filter(|e| seen.insert(child_ty.key_of(e.row())))
            .map(|e| e.row().clone())
            .collect();
        for item in staged {
            if let Some(item) = current_graph(model, tracker, child, item)? {
                members.push(item);
            }
        }
        put_navigation(&mut graph, child, members);
    }
    Ok(Some(graph))
}

/// Every `(child_field, parent_field)` pair holds the same non-null value.
fn references(child: &Row, parent: &Row, pairs: &[(&'static str, &'static str)]) -> bool {
    pairs.iter().all(|(child_field, parent_field)| {
        match (child.get(*child_field), parent.get(*parent_field)) {
            (Some(c), Some(p)) => !p.is_null() && c == p,
            _ => false,
        }
    })
}

/// Removes a navigation from a row, normalized to a list of 0..n rows.
fn take_navigation(row: &mut Row, name: &str) -> Vec<Row> {
    match row.remove(name) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Some(Value::Object(map)) => vec![map],
        _ => Vec::new(),
    }
}

fn put_navigation(row: &mut Row, node: &OwnedNode, children: Vec<Row>) {
    let value = if node.collection {
        Value::Array(children.into_iter().map(Value::Object).collect())
    } else {
        children
            .into_iter()
            .next()
            .map(Value::Object)
            .unwrap_or(Value::Null)
    };
    row.insert(node.name.clone(), value);
}

fn navigation_items<'r>(row: &'r Row, name: &str) -> Vec<&'r Row> {
    match row.get(name) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        Some(Value::Object(map)) => vec![map],
        _ => Vec::new(),
    }
}
