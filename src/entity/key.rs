use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::RepositoryError;

/// Key-kind descriptor for an entity's primary key.
///
/// A key is viewed as the tuple of its field values in declared key order.
/// Scalar keys have one value; composite keys have several and can only be
/// matched by per-key equality, never by set membership.
pub trait PrimaryKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    const COMPOSITE: bool = false;

    fn to_values(&self) -> Vec<Value>;

    fn from_values(values: &[Value]) -> Result<Self, RepositoryError>;

    /// True when the key still holds its "not generated yet" value.
    fn is_unset(&self) -> bool;

    /// Human readable form used in not-found messages.
    fn describe(&self) -> String {
        let parts: Vec<String> = self.to_values().iter().map(plain).collect();
        if parts.len() == 1 {
            parts.into_iter().next().unwrap_or_default()
        } else {
            format!("({})", parts.join(", "))
        }
    }
}

/// A single-column key value usable inside tuple keys.
pub trait ScalarKey: PrimaryKey + Serialize + DeserializeOwned {
    fn to_value(&self) -> Value;
}

/// Canonical identity string for a key tuple.
pub fn key_string(values: &[Value]) -> String {
    Value::Array(values.to_vec()).to_string()
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn single(values: &[Value]) -> Result<&Value, RepositoryError> {
    match values {
        [value] => Ok(value),
        _ => Err(RepositoryError::invalid_argument(format!(
            "expected 1 key value, got {}",
            values.len()
        ))),
    }
}

macro_rules! integer_key {
    ($($t:ty),*) => {$(
        impl PrimaryKey for $t {
            fn to_values(&self) -> Vec<Value> {
                vec![Value::from(*self)]
            }

            fn from_values(values: &[Value]) -> Result<Self, RepositoryError> {
                Ok(serde_json::from_value(single(values)?.clone())?)
            }

            fn is_unset(&self) -> bool {
                *self == 0
            }
        }

        impl ScalarKey for $t {
            fn to_value(&self) -> Value {
                Value::from(*self)
            }
        }
    )*};
}

integer_key!(i32, i64, u32, u64);

impl PrimaryKey for String {
    fn to_values(&self) -> Vec<Value> {
        vec![Value::String(self.clone())]
    }

    fn from_values(values: &[Value]) -> Result<Self, RepositoryError> {
        Ok(serde_json::from_value(single(values)?.clone())?)
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl ScalarKey for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl PrimaryKey for Uuid {
    fn to_values(&self) -> Vec<Value> {
        vec![Value::String(self.to_string())]
    }

    fn from_values(values: &[Value]) -> Result<Self, RepositoryError> {
        Ok(serde_json::from_value(single(values)?.clone())?)
    }

    fn is_unset(&self) -> bool {
        self.is_nil()
    }
}

impl ScalarKey for Uuid {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl<A: ScalarKey, B: ScalarKey> PrimaryKey for (A, B) {
    const COMPOSITE: bool = true;

    fn to_values(&self) -> Vec<Value> {
        vec![self.0.to_value(), self.1.to_value()]
    }

    fn from_values(values: &[Value]) -> Result<Self, RepositoryError> {
        match values {
            [a, b] => Ok((
                serde_json::from_value(a.clone())?,
                serde_json::from_value(b.clone())?,
            )),
            _ => Err(RepositoryError::invalid_argument(format!(
                "expected 2 key values, got {}",
                values.len()
            ))),
        }
    }

    fn is_unset(&self) -> bool {
        self.0.is_unset() || self.1.is_unset()
    }
}

impl<A: ScalarKey, B: ScalarKey, C: ScalarKey> PrimaryKey for (A, B, C) {
    const COMPOSITE: bool = true;

    fn to_values(&self) -> Vec<Value> {
        vec![self.0.to_value(), self.1.to_value(), self.2.to_value()]
    }

    fn from_values(values: &[Value]) -> Result<Self, RepositoryError> {
        match values {
            [a, b, c] => Ok((
                serde_json::from_value(a.clone())?,
                serde_json::from_value(b.clone())?,
                serde_json::from_value(c.clone())?,
            )),
            _ => Err(RepositoryError::invalid_argument(format!(
                "expected 3 key values, got {}",
                values.len()
            ))),
        }
    }

    fn is_unset(&self) -> bool {
        self.0.is_unset() || self.1.is_unset() || self.2.is_unset()
    }
}
