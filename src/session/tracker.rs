use std::collections::HashMap;

use serde_json::Value;

use crate::entity::KeyCell;
use crate::error::RepositoryError;
use crate::model::EntityType;
use crate::store::Row;

pub type EntryId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    Detached,
}

impl EntryState {
    /// Added, modified or deleted.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            EntryState::Added | EntryState::Modified | EntryState::Deleted
        )
    }
}

/// Child-to-parent linkage recorded when the reconciler rewrites foreign keys.
/// Re-applied at save time once the parent's generated key is known.
#[derive(Debug, Clone)]
pub(crate) struct ForeignKeyLink {
    pub parent: EntryId,
    pub pairs: Vec<(&'static str, &'static str)>,
}

/// A tracked row.
#[derive(Clone)]
pub struct Entry {
    table: &'static str,
    state: EntryState,
    row: Row,
    original: Option<Row>,
    original_version: Option<u64>,
    provisional_key: bool,
    key: KeyCell,
    links: Vec<ForeignKeyLink>,
}

impl Entry {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Audit services move deleted soft-delete rows back to modified.
    pub fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn row_mut(&mut self) -> &mut Row {
        &mut self.row
    }

    pub fn set_field(&mut self, field: &str, value: Value) {
        self.row.insert(field.to_string(), value);
    }

    pub fn original(&self) -> Option<&Row> {
        self.original.as_ref()
    }

    pub fn original_version(&self) -> Option<u64> {
        self.original_version
    }

    /// The key is a temporary placeholder until the next save.
    pub fn has_provisional_key(&self) -> bool {
        self.provisional_key
    }

    pub(crate) fn key_cell(&self) -> &KeyCell {
        &self.key
    }

    pub(crate) fn links(&self) -> &[ForeignKeyLink] {
        &self.links
    }
}

/// Identity map and staged state of one session.
#[derive(Clone)]
pub struct ChangeTracker {
    entries: Vec<Entry>,
    /// Table, then key string.
    index: HashMap<&'static str, HashMap<String, EntryId>>,
    next_temp_key: i64,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            next_temp_key: -1,
        }
    }

    /// Tracks a loaded row as unchanged. A row already tracked under the same
    /// key keeps its entry and current values.
    pub(crate) fn attach(&mut self, ty: &EntityType, row: Row) -> EntryId {
        let key = ty.key_of(&row);
        if let Some(id) = self.find_id(ty.table(), &key) {
            return id;
        }
        let id = self.entries.len();
        self.entries.push(Entry {
            table: ty.table(),
            state: EntryState::Unchanged,
            original_version: ty.version_of(&row),
            original: Some(row.clone()),
            provisional_key: false,
            key: KeyCell::new(ty.key_values(&row), false),
            row,
            links: Vec::new(),
        });
        self.index.entry(ty.table()).or_default().insert(key, id);
        id
    }

    /// Stages a new row. Unset generated keys get a temporary negative value,
    /// written back into `row` so children can link to it.
    pub(crate) fn add(&mut self, ty: &EntityType, row: &mut Row) -> Result<EntryId, RepositoryError> {
        let provisional = ty.has_unset_key(row);
        if provisional {
            let temp = self.next_temp_key;
            self.next_temp_key -= 1;
            for field in ty.key_fields() {
                row.insert(field.to_string(), Value::from(temp));
            }
        }

        let key = ty.key_of(row);
        if self.find_id(ty.table(), &key).is_some() {
            return Err(RepositoryError::invalid_argument(format!(
                "{} with key {} is already tracked",
                ty.name(),
                key
            )));
        }

        let id = self.entries.len();
        self.entries.push(Entry {
            table: ty.table(),
            state: EntryState::Added,
            row: ty.scalar_row(row),
            original: None,
            original_version: None,
            provisional_key: provisional,
            key: KeyCell::new(ty.key_values(row), provisional),
            links: Vec::new(),
        });
        self.index.entry(ty.table()).or_default().insert(key, id);
        Ok(id)
    }

    /// Replaces the current values; an unchanged entry whose values now
    /// differ from the loaded ones becomes modified.
    pub(crate) fn set_values(&mut self, id: EntryId, row: Row) {
        let entry = &mut self.entries[id];
        if entry.state == EntryState::Unchanged && entry.original.as_ref() != Some(&row) {
            entry.state = EntryState::Modified;
        }
        entry.row = row;
    }

    pub(crate) fn set_original_version(&mut self, id: EntryId, version: Option<u64>) {
        self.entries[id].original_version = version;
    }

    /// Added entries are simply forgotten; others are staged for deletion.
    pub(crate) fn remove(&mut self, id: EntryId) {
        let entry = &mut self.entries[id];
        match entry.state {
            EntryState::Added => {
                entry.state = EntryState::Detached;
                if let Some(keys) = self.index.get_mut(entry.table) {
                    keys.retain(|_, v| *v != id);
                }
            }
            EntryState::Detached => {}
            _ => entry.state = EntryState::Deleted,
        }
    }

    pub(crate) fn link(
        &mut self,
        child: EntryId,
        parent: EntryId,
        pairs: Vec<(&'static str, &'static str)>,
    ) {
        let links = &mut self.entries[child].links;
        links.retain(|l| l.pairs != pairs);
        links.push(ForeignKeyLink { parent, pairs });
    }

    pub fn find_id(&self, table: &str, key: &str) -> Option<EntryId> {
        self.index.get(table)?.get(key).copied()
    }

    pub(crate) fn find_id_for(&self, ty: &EntityType, key: &str) -> Option<EntryId> {
        self.find_id(ty.table(), key)
    }

    /// Some entry linked to `parent` has pending changes. Covers children
    /// that were staged for removal and no longer appear in the graph.
    pub(crate) fn has_pending_dependents(&self, parent: EntryId) -> bool {
        self.entries.iter().any(|e| {
            e.state.is_pending() && e.links.iter().any(|l| l.parent == parent)
        })
    }

    pub fn state_of(&self, table: &str, key: &str) -> Option<EntryState> {
        self.find_id(table, key).map(|id| self.entries[id].state)
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub(crate) fn entries_with_ids(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state != EntryState::Detached)
    }

    /// Live entries in staging order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|e| e.state != EntryState::Detached)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries
            .iter_mut()
            .filter(|e| e.state != EntryState::Detached)
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.state.is_pending())
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detaches everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.next_temp_key = -1;
    }
}
