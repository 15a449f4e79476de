//! InMemoryStore - HashMap-backed row store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{Change, Row, Store};
use crate::error::RepositoryError;

struct StoredRow {
    bytes: Vec<u8>,
    version: u64,
    seq: u64,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, StoredRow>,
    sequences: HashMap<String, i64>,
    next_seq: u64,
}

/// In-memory store backed by a HashMap.
///
/// Storage key is `"TABLE:key"`. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    storage: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(table: &str, key: &str) -> String {
        format!("{}:{}", table, key)
    }

    /// Number of physical rows in a table.
    pub fn row_count(&self, table: &str) -> Result<usize, RepositoryError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;
        let prefix = format!("{}:", table);
        Ok(storage.rows.keys().filter(|k| k.starts_with(&prefix)).count())
    }

    /// Stored version of a row, if present.
    pub fn version(&self, table: &str, key: &str) -> Result<Option<u64>, RepositoryError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;
        Ok(storage
            .rows
            .get(&Self::make_key(table, key))
            .map(|r| r.version))
    }
}

fn conflict(table: &str, key: &str, expected: u64, actual: u64) -> RepositoryError {
    warn!(table, key, expected, actual, "row version conflict");
    RepositoryError::Conflict {
        table: table.to_string(),
        key: key.to_string(),
        expected,
        actual,
    }
}

fn encode(mut row: Row, version_field: Option<&'static str>, version: u64) -> Result<Vec<u8>, RepositoryError> {
    if let Some(field) = version_field {
        row.insert(field.to_string(), Value::from(version));
    }
    Ok(serde_json::to_vec(&row)?)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn rows(&self, table: &str) -> Result<Vec<Row>, RepositoryError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;

        let prefix = format!("{}:", table);
        let mut stored: Vec<&StoredRow> = storage
            .rows
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v)
            .collect();
        stored.sort_by_key(|r| r.seq);

        stored
            .into_iter()
            .map(|r| Ok(serde_json::from_slice::<Row>(&r.bytes)?))
            .collect()
    }

    async fn next_key(&self, table: &str) -> Result<i64, RepositoryError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;
        let next = storage.sequences.entry(table.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<(), RepositoryError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;

        // Validate against the rows as they will look after earlier changes
        // in the same batch, then write everything at once.
        let mut pending: Vec<(String, Option<StoredRow>)> = Vec::with_capacity(changes.len());
        let mut seq = storage.next_seq;

        for change in changes {
            let full_key = Self::make_key(change.table(), change.key());
            let current = match pending.iter().rev().find(|(k, _)| *k == full_key) {
                Some((_, row)) => row.as_ref().map(|r| (r.version, r.seq)),
                None => storage.rows.get(&full_key).map(|r| (r.version, r.seq)),
            };

            match change {
                Change::Insert {
                    table,
                    key,
                    row,
                    version_field,
                } => {
                    if let Some((actual, _)) = current {
                        return Err(conflict(table, &key, 0, actual));
                    }
                    seq += 1;
                    let bytes = encode(row, version_field, 1)?;
                    pending.push((
                        full_key,
                        Some(StoredRow {
                            bytes,
                            version: 1,
                            seq,
                        }),
                    ));
                }
                Change::Update {
                    table,
                    key,
                    row,
                    expected_version,
                    version_field,
                } => {
                    let Some((actual, row_seq)) = current else {
                        return Err(conflict(table, &key, expected_version.unwrap_or(0), 0));
                    };
                    if let Some(expected) = expected_version {
                        if expected != actual {
                            return Err(conflict(table, &key, expected, actual));
                        }
                    }
                    let version = actual + 1;
                    let bytes = encode(row, version_field, version)?;
                    pending.push((
                        full_key,
                        Some(StoredRow {
                            bytes,
                            version,
                            seq: row_seq,
                        }),
                    ));
                }
                Change::Delete {
                    table,
                    key,
                    expected_version,
                } => {
                    let Some((actual, _)) = current else {
                        return Err(conflict(table, &key, expected_version.unwrap_or(0), 0));
                    };
                    if let Some(expected) = expected_version {
                        if expected != actual {
                            return Err(conflict(table, &key, expected, actual));
                        }
                    }
                    pending.push((full_key, None));
                }
            }
        }

        storage.next_seq = seq;
        for (key, row) in pending {
            match row {
                Some(row) => {
                    storage.rows.insert(key, row);
                }
                None => {
                    storage.rows.remove(&key);
                }
            }
        }
        Ok(())
    }
}
