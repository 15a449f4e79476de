use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::PrimaryKey;
use crate::error::RepositoryError;

#[derive(Debug)]
struct KeyState {
    values: Vec<Value>,
    provisional: bool,
}

/// Shared slot holding the key of a staged row.
///
/// The session rewrites it when a save assigns the real key.
#[derive(Clone, Debug)]
pub(crate) struct KeyCell {
    state: Arc<RwLock<KeyState>>,
}

impl KeyCell {
    pub(crate) fn new(values: Vec<Value>, provisional: bool) -> Self {
        Self {
            state: Arc::new(RwLock::new(KeyState {
                values,
                provisional,
            })),
        }
    }

    pub(crate) fn set(&self, values: Vec<Value>) -> Result<(), RepositoryError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;
        state.values = values;
        state.provisional = false;
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<Value>>, RepositoryError> {
        let state = self
            .state
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".into()))?;
        if state.provisional {
            Ok(None)
        } else {
            Ok(Some(state.values.clone()))
        }
    }
}

/// Deferred accessor for the key of a created entity.
///
/// Store-generated keys only exist after the unit of work saves, so the
/// accessor is evaluated on every call rather than captured at creation.
#[derive(Clone, Debug)]
pub struct KeyAccessor<K> {
    cell: KeyCell,
    _marker: PhantomData<K>,
}

impl<K: PrimaryKey> KeyAccessor<K> {
    pub(crate) fn new(cell: KeyCell) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// The persisted key, or `None` while the entity is only staged.
    pub fn get(&self) -> Result<Option<K>, RepositoryError> {
        match self.cell.read()? {
            Some(values) => Ok(Some(K::from_values(&values)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but fails when the key is not materialized yet.
    pub fn require(&self) -> Result<K, RepositoryError> {
        self.get()?.ok_or_else(|| {
            RepositoryError::invalid_argument("key is only available after the unit of work saves")
        })
    }
}
