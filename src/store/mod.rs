//! Row storage behind a session.
//!
//! A [`Store`] keeps serialized rows per table and applies a batch of changes
//! atomically: either every change passes its version check and is written,
//! or nothing is. [`InMemoryStore`] is the bundled implementation.

mod in_memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RepositoryError;

pub use in_memory::InMemoryStore;

pub type Row = Map<String, Value>;

/// One staged write.
///
/// `key` is the canonical key string of the row. When `version_field` is set
/// the store writes the new row version into that field.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert {
        table: &'static str,
        key: String,
        row: Row,
        version_field: Option<&'static str>,
    },
    Update {
        table: &'static str,
        key: String,
        row: Row,
        expected_version: Option<u64>,
        version_field: Option<&'static str>,
    },
    Delete {
        table: &'static str,
        key: String,
        expected_version: Option<u64>,
    },
}

impl Change {
    pub fn table(&self) -> &'static str {
        match self {
            Change::Insert { table, .. }
            | Change::Update { table, .. }
            | Change::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Change::Insert { key, .. } | Change::Update { key, .. } | Change::Delete { key, .. } => {
                key
            }
        }
    }
}

/// Storage contract consumed by the session.
#[async_trait]
pub trait Store: Send + Sync {
    /// All rows of a table in insertion order.
    async fn rows(&self, table: &str) -> Result<Vec<Row>, RepositoryError>;

    /// Next value of the table's key sequence.
    async fn next_key(&self, table: &str) -> Result<i64, RepositoryError>;

    /// Applies every change or none. Version mismatches, duplicate inserts and
    /// writes to vanished rows are reported as [`RepositoryError::Conflict`].
    async fn apply(&self, changes: Vec<Change>) -> Result<(), RepositoryError>;
}
