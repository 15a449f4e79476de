use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::entity::{key_string, Entity, PrimaryKey};
use crate::model::EntityType;

/// Predicate expression evaluated by the session against each candidate.
///
/// `FieldEq` and `KeyIn` inspect the stored row and can be pushed down to
/// any backend; `Predicate` runs against the materialized entity.
pub enum Filter<E> {
    True,
    False,
    Predicate(Arc<dyn Fn(&E) -> bool + Send + Sync>),
    FieldEq { field: String, value: Value },
    KeyIn(HashSet<String>),
    And(Vec<Filter<E>>),
    Or(Vec<Filter<E>>),
    Not(Box<Filter<E>>),
}

impl<E> Clone for Filter<E> {
    fn clone(&self) -> Self {
        match self {
            Filter::True => Filter::True,
            Filter::False => Filter::False,
            Filter::Predicate(f) => Filter::Predicate(Arc::clone(f)),
            Filter::FieldEq { field, value } => Filter::FieldEq {
                field: field.clone(),
                value: value.clone(),
            },
            Filter::KeyIn(keys) => Filter::KeyIn(keys.clone()),
            Filter::And(items) => Filter::And(items.clone()),
            Filter::Or(items) => Filter::Or(items.clone()),
            Filter::Not(inner) => Filter::Not(inner.clone()),
        }
    }
}

impl<E> fmt::Debug for Filter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::True => write!(f, "True"),
            Filter::False => write!(f, "False"),
            Filter::Predicate(_) => write!(f, "Predicate(..)"),
            Filter::FieldEq { field, value } => write!(f, "{} == {}", field, value),
            Filter::KeyIn(keys) => write!(f, "KeyIn({} keys)", keys.len()),
            Filter::And(items) => f.debug_tuple("And").field(items).finish(),
            Filter::Or(items) => f.debug_tuple("Or").field(items).finish(),
            Filter::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
        }
    }
}

impl<E: Entity> Filter<E> {
    pub fn predicate(f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Filter::Predicate(Arc::new(f))
    }

    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Equality on every key field of a single key.
    pub fn key_eq(ty: &EntityType, key: &E::Key) -> Self {
        let parts = ty
            .key_fields()
            .iter()
            .zip(key.to_values())
            .map(|(field, value)| Filter::field_eq(*field, value))
            .collect();
        Filter::And(parts)
    }

    /// Restricts to `ids`, or to their complement when `invert` is set.
    ///
    /// An empty list matches nothing, and everything when inverted.
    /// Composite keys become an OR-chain of per-key equalities.
    pub fn by_ids(ty: &EntityType, ids: &[E::Key], invert: bool) -> Self {
        let matching = if ids.is_empty() {
            Filter::False
        } else if <E::Key as PrimaryKey>::COMPOSITE {
            Filter::Or(ids.iter().map(|id| Filter::key_eq(ty, id)).collect())
        } else {
            Filter::KeyIn(ids.iter().map(|id| key_string(&id.to_values())).collect())
        };
        if invert {
            matching.not()
        } else {
            matching
        }
    }

    pub fn and(self, other: Filter<E>) -> Self {
        match self {
            Filter::True => other,
            Filter::And(mut items) => {
                items.push(other);
                Filter::And(items)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter<E>) -> Self {
        match self {
            Filter::False => other,
            Filter::Or(mut items) => {
                items.push(other);
                Filter::Or(items)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Filter::True => Filter::False,
            Filter::False => Filter::True,
            Filter::Not(inner) => *inner,
            this => Filter::Not(Box::new(this)),
        }
    }

    pub fn matches(&self, entity: &E, row: &Map<String, Value>) -> bool {
        match self {
            Filter::True => true,
            Filter::False => false,
            Filter::Predicate(f) => f(entity),
            Filter::FieldEq { field, value } => row.get(field).unwrap_or(&Value::Null) == value,
            Filter::KeyIn(keys) => keys.contains(&key_string(&entity.key().to_values())),
            Filter::And(items) => items.iter().all(|f| f.matches(entity, row)),
            Filter::Or(items) => items.iter().any(|f| f.matches(entity, row)),
            Filter::Not(inner) => !inner.matches(entity, row),
        }
    }
}
