//! Persistence session.
//!
//! A session executes [`Query`] values against a [`Store`], eagerly loads the
//! navigations a query includes, tracks loaded and staged rows in its
//! [`ChangeTracker`], and saves everything in one atomic batch.
//!
//! One session serves one logical operation. Its cancellation token is
//! checked before every store call.
//!
//! ## Example
//!
//! ```ignore
//! let session = Arc::new(Session::new(model, Arc::new(InMemoryStore::new())));
//! let companies = session.list(&Query::<Company>::new().include("departments")).await?;
//! ```

mod tracker;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::entity::Entity;
use crate::error::RepositoryError;
use crate::model::Model;
use crate::owned::{OwnedNode, OwnedPropertiesExtractor};
use crate::query::{find_field, Query, SortSelector};
use crate::store::{Change, Row, Store};

pub use tracker::{ChangeTracker, Entry, EntryId, EntryState};

/// Unit-of-work scoped connection to a store.
pub struct Session {
    model: Arc<Model>,
    store: Arc<dyn Store>,
    tracker: Mutex<ChangeTracker>,
    cancellation: CancellationToken,
}

impl Session {
    pub fn new(model: Arc<Model>, store: Arc<dyn Store>) -> Self {
        Self {
            model,
            store,
            tracker: Mutex::new(ChangeTracker::new()),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Exclusive access to the change tracker.
    pub async fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        self.tracker.lock().await
    }

    pub(crate) fn ensure_active(&self) -> Result<(), RepositoryError> {
        if self.cancellation.is_cancelled() {
            Err(RepositoryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Matching entities, ordered and windowed.
    pub async fn list<E: Entity>(&self, query: &Query<E>) -> Result<Vec<E>, RepositoryError> {
        let (page, _) = self.execute(query).await?;
        Ok(page.into_iter().map(|(e, _)| e).collect())
    }

    /// Matching entities together with their loaded row graphs.
    pub(crate) async fn fetch<E: Entity>(&self, query: &Query<E>) -> Result<Vec<(E, Row)>, RepositoryError> {
        let (page, _) = self.execute(query).await?;
        Ok(page)
    }

    pub async fn first<E: Entity>(&self, query: &Query<E>) -> Result<Option<E>, RepositoryError> {
        let query = query.clone().window(query.skip(), Some(1));
        Ok(self.list(&query).await?.into_iter().next())
    }

    /// Number of matches, ignoring the window.
    pub async fn count<E: Entity>(&self, query: &Query<E>) -> Result<usize, RepositoryError> {
        let (_, total) = self.execute(&query.unpaged()).await?;
        Ok(total)
    }

    pub async fn any<E: Entity>(&self, query: &Query<E>) -> Result<bool, RepositoryError> {
        Ok(self.count(query).await? > 0)
    }

    async fn execute<E: Entity>(
        &self,
        query: &Query<E>,
    ) -> Result<(Vec<(E, Row)>, usize), RepositoryError> {
        self.ensure_active()?;
        let tree = OwnedPropertiesExtractor::new(&self.model).extract(query)?;

        let mut tables: HashMap<&'static str, Vec<Row>> = HashMap::new();
        let mut pending = vec![&tree];
        while let Some(node) = pending.pop() {
            if !tables.contains_key(node.table) {
                let rows = self.store.rows(node.table).await?;
                tables.insert(node.table, rows);
            }
            pending.extend(node.children.values());
        }

        let mut matched = Vec::new();
        for row in tables.get(E::TABLE).map(Vec::as_slice).unwrap_or(&[]) {
            let graph = load_includes(row.clone(), &tree, &tables);
            let entity: E = serde_json::from_value(Value::Object(graph.clone()))?;
            if query.matches(&entity, &graph) {
                matched.push((entity, graph));
            }
        }

        if let Some(order) = query.order() {
            if let SortSelector::Field(name) = &order.selector {
                if matched.iter().any(|(_, g)| find_field(g, name).is_none()) {
                    return Err(RepositoryError::invalid_argument(format!(
                        "{} has no field named {}",
                        E::type_name(),
                        name
                    )));
                }
            }
            let mut keyed: Vec<_> = matched
                .into_iter()
                .map(|(e, g)| (order.selector.value(&e, &g), (e, g)))
                .collect();
            if order.descending {
                keyed.sort_by(|a, b| b.0.cmp(&a.0));
            } else {
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
            }
            matched = keyed.into_iter().map(|(_, item)| item).collect();
        }

        let total = matched.len();
        let page: Vec<(E, Row)> = matched
            .into_iter()
            .skip(query.skip())
            .take(query.take().unwrap_or(usize::MAX))
            .collect();

        if query.is_tracking() {
            let mut tracker = self.tracker.lock().await;
            for (_, graph) in &page {
                track_graph(&mut tracker, &self.model, &tree, graph)?;
            }
        }

        debug!(
            table = E::TABLE,
            total,
            returned = page.len(),
            tracking = query.is_tracking(),
            "executed query"
        );
        Ok((page, total))
    }

    /// Persists staged changes and clears the tracker.
    pub async fn save_changes(&self) -> Result<usize, RepositoryError> {
        let mut tracker = self.tracker.lock().await;
        self.persist(&mut tracker).await
    }

    /// Writes every pending entry of `tracker` in one batch.
    ///
    /// Temporary keys are replaced by store-generated ones in staging order and
    /// linked foreign keys are rewritten before anything is sent. On failure
    /// the tracker is left as it was.
    pub(crate) async fn persist(&self, tracker: &mut ChangeTracker) -> Result<usize, RepositoryError> {
        self.ensure_active()?;

        let mut finals: HashMap<EntryId, Row> = HashMap::new();
        let mut keys = Vec::new();
        let mut changes = Vec::new();

        for (id, entry) in tracker.entries_with_ids() {
            let ty = self.model.entity_type(entry.table())?;
            let mut row = entry.row().clone();

            for link in entry.links() {
                let parent = finals
                    .get(&link.parent)
                    .or_else(|| tracker.entry(link.parent).map(Entry::row));
                if let Some(parent) = parent {
                    for (child_field, parent_field) in &link.pairs {
                        let value = parent.get(*parent_field).cloned().unwrap_or(Value::Null);
                        row.insert(child_field.to_string(), value);
                    }
                }
            }

            if entry.state() == EntryState::Added && entry.has_provisional_key() {
                let next = self.store.next_key(ty.table()).await?;
                for field in ty.key_fields() {
                    row.insert(field.to_string(), Value::from(next));
                }
            }

            let key = ty.key_of(&row);
            let version_field = ty.capabilities().version;
            let expected_version = version_field.and(entry.original_version());
            match entry.state() {
                EntryState::Added => {
                    keys.push((id, ty.key_values(&row)));
                    changes.push(Change::Insert {
                        table: ty.table(),
                        key,
                        row: row.clone(),
                        version_field,
                    });
                }
                EntryState::Modified => changes.push(Change::Update {
                    table: ty.table(),
                    key,
                    row: row.clone(),
                    expected_version,
                    version_field,
                }),
                EntryState::Deleted => changes.push(Change::Delete {
                    table: ty.table(),
                    key,
                    expected_version,
                }),
                EntryState::Unchanged | EntryState::Detached => {}
            }
            finals.insert(id, row);
        }

        let count = changes.len();
        if count > 0 {
            self.ensure_active()?;
            self.store.apply(changes).await?;
        }

        for (id, values) in keys {
            if let Some(entry) = tracker.entry(id) {
                entry.key_cell().set(values)?;
            }
        }
        tracker.clear();
        info!(changes = count, "saved changes");
        Ok(count)
    }

    /// Detaches every tracked entity.
    pub async fn clear(&self) {
        self.tracker.lock().await.clear();
    }
}

/// Attaches included navigations to `row`, matching children by foreign key.
fn load_includes(mut row: Row, node: &OwnedNode, tables: &HashMap<&'static str, Vec<Row>>) -> Row {
    for child in node.children.values() {
        let candidates = tables.get(child.table).map(Vec::as_slice).unwrap_or(&[]);
        let children: Vec<Value> = candidates
            .iter()
            .filter(|candidate| {
                child.foreign_key.iter().all(|(child_field, parent_field)| {
                    match (candidate.get(*child_field), row.get(*parent_field)) {
                        (Some(c), Some(p)) => !p.is_null() && c == p,
                        _ => false,
                    }
                })
            })
            .map(|candidate| Value::Object(load_includes(candidate.clone(), child, tables)))
            .collect();

        let value = if child.collection {
            Value::Array(children)
        } else {
            children.into_iter().next().unwrap_or(Value::Null)
        };
        row.insert(child.name.clone(), value);
    }
    row
}

/// Attaches a loaded graph to the tracker, root first.
fn track_graph(
    tracker: &mut ChangeTracker,
    model: &Model,
    node: &OwnedNode,
    graph: &Row,
) -> Result<(), RepositoryError> {
    let ty = model.entity_type(node.table)?;
    tracker.attach(ty, ty.scalar_row(graph));
    for child in node.children.values() {
        match graph.get(&child.name) {
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(item) = item {
                        track_graph(tracker, model, child, item)?;
                    }
                }
            }
            Some(Value::Object(item)) => track_graph(tracker, model, child, item)?,
            _ => {}
        }
    }
    Ok(())
}
