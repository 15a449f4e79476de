use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entity::{Entity, PrimaryKey};
use crate::error::RepositoryError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    NotSet,
    Asc,
    Desc,
}

/// A totally ordered value produced by a sort selector.
///
/// Values of different kinds order as null < bool < number < text < list.
#[derive(Debug, Clone)]
pub enum SortValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<SortValue>),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Bool(_) => 1,
            SortValue::Int(_) | SortValue::UInt(_) | SortValue::Float(_) => 2,
            SortValue::Text(_) => 3,
            SortValue::List(_) => 4,
        }
    }
}

/// Exact comparison of an integer with a float. Integers never round
/// through `f64`.
fn cmp_int_float(int: i128, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    // Every i64 and u64 lies in [-2^63, 2^64).
    if float >= 18_446_744_073_709_551_616.0 {
        return Ordering::Less;
    }
    if float < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i128)) {
        Ordering::Equal if float > whole => Ordering::Less,
        Ordering::Equal if float < whole => Ordering::Greater,
        ordering => ordering,
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use SortValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Int(a), UInt(b)) => i128::from(*a).cmp(&i128::from(*b)),
            (UInt(a), Int(b)) => i128::from(*a).cmp(&i128::from(*b)),
            // Both zeros are equal so integers stay consistent with them.
            (Float(a), Float(b)) if a == b => Ordering::Equal,
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => cmp_int_float(i128::from(*a), *b),
            (UInt(a), Float(b)) => cmp_int_float(i128::from(*a), *b),
            (Float(_), Int(_) | UInt(_)) => other.cmp(self).reverse(),
            (Text(a), Text(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortValue {}

impl From<&Value> for SortValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SortValue::Null,
            Value::Bool(b) => SortValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SortValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SortValue::UInt(u)
                } else {
                    SortValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => SortValue::Text(s.clone()),
            Value::Array(items) => SortValue::List(items.iter().map(SortValue::from).collect()),
            Value::Object(_) => SortValue::Text(value.to_string()),
        }
    }
}

macro_rules! sort_value_from {
    ($variant:ident: $($t:ty),*) => {$(
        impl From<$t> for SortValue {
            fn from(v: $t) -> Self {
                SortValue::$variant(v.into())
            }
        }
    )*};
}

sort_value_from!(Int: i8, i16, i32, i64);
sort_value_from!(UInt: u8, u16, u32, u64);
sort_value_from!(Float: f32, f64);
sort_value_from!(Bool: bool);
sort_value_from!(Text: String, &str);

impl From<DateTime<Utc>> for SortValue {
    fn from(v: DateTime<Utc>) -> Self {
        SortValue::Text(v.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))
    }
}

impl From<Uuid> for SortValue {
    fn from(v: Uuid) -> Self {
        SortValue::Text(v.to_string())
    }
}

impl<T: Into<SortValue>> From<Option<T>> for SortValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SortValue::Null)
    }
}

/// Produces the sort key of a candidate.
pub enum SortSelector<E> {
    /// The primary key, field by field.
    Key,
    /// A stored row field looked up by name, case-insensitively.
    /// Only built through [`unsafe_dynamic_sort`].
    Field(String),
    Custom(Arc<dyn Fn(&E) -> SortValue + Send + Sync>),
}

impl<E> Clone for SortSelector<E> {
    fn clone(&self) -> Self {
        match self {
            SortSelector::Key => SortSelector::Key,
            SortSelector::Field(name) => SortSelector::Field(name.clone()),
            SortSelector::Custom(f) => SortSelector::Custom(Arc::clone(f)),
        }
    }
}

impl<E> fmt::Debug for SortSelector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortSelector::Key => write!(f, "Key"),
            SortSelector::Field(name) => write!(f, "Field({})", name),
            SortSelector::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl<E: Entity> SortSelector<E> {
    pub fn by<T: Into<SortValue>>(f: impl Fn(&E) -> T + Send + Sync + 'static) -> Self {
        SortSelector::Custom(Arc::new(move |e| f(e).into()))
    }

    pub fn value(&self, entity: &E, row: &Map<String, Value>) -> SortValue {
        match self {
            SortSelector::Key => {
                SortValue::List(entity.key().to_values().iter().map(SortValue::from).collect())
            }
            SortSelector::Field(name) => find_field(row, name)
                .map(SortValue::from)
                .unwrap_or(SortValue::Null),
            SortSelector::Custom(f) => f(entity),
        }
    }
}

/// Sort by a row field named at runtime.
///
/// Nothing checks the name against an allow-list, so only repositories that
/// opt into [`Sorting::Dynamic`] reach this. Unknown names fail when the
/// query executes.
pub fn unsafe_dynamic_sort<E>(field: impl Into<String>) -> SortSelector<E> {
    SortSelector::Field(field.into())
}

pub(crate) fn find_field<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// Normalized form used for case-insensitive field lookups:
/// `createdAt`, `CreatedAt` and `created_at` all resolve to the same name.
pub(crate) fn normalize_field(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Named sort keys a repository accepts.
///
/// Names are matched in normalized form. Two names that normalize alike
/// keep the first selector and make [`SortFields::check`] fail.
pub struct SortFields<E> {
    fields: BTreeMap<String, (String, SortSelector<E>)>,
    collisions: Vec<(String, String)>,
}

impl<E> Clone for SortFields<E> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            collisions: self.collisions.clone(),
        }
    }
}

impl<E: Entity> Default for SortFields<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> SortFields<E> {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            collisions: Vec::new(),
        }
    }

    pub fn field<T: Into<SortValue>>(
        self,
        name: &str,
        f: impl Fn(&E) -> T + Send + Sync + 'static,
    ) -> Self {
        self.selector(name, SortSelector::by(f))
    }

    pub fn selector(mut self, name: &str, selector: SortSelector<E>) -> Self {
        match self.fields.entry(normalize_field(name)) {
            Entry::Vacant(slot) => {
                slot.insert((name.to_string(), selector));
            }
            Entry::Occupied(slot) => {
                self.collisions.push((slot.get().0.clone(), name.to_string()));
            }
        }
        self
    }

    /// Fails when two registered names resolve to the same field.
    pub fn check(&self) -> Result<(), RepositoryError> {
        match self.collisions.first() {
            None => Ok(()),
            Some((first, second)) => Err(RepositoryError::invalid_argument(format!(
                "sort fields \"{}\" and \"{}\" resolve to the same name",
                first, second
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SortSelector<E>> {
        self.fields.get(&normalize_field(name)).map(|(_, s)| s)
    }

    /// Registered names in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.values().map(|(n, _)| n.clone()).collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// How a repository resolves a requested sort field.
pub enum Sorting<E> {
    /// Any requested sort field is rejected.
    Unsupported,
    AllowList(SortFields<E>),
    /// Opt-in: the name is resolved against row fields at runtime.
    Dynamic,
}

impl<E> Clone for Sorting<E> {
    fn clone(&self) -> Self {
        match self {
            Sorting::Unsupported => Sorting::Unsupported,
            Sorting::AllowList(fields) => Sorting::AllowList(fields.clone()),
            Sorting::Dynamic => Sorting::Dynamic,
        }
    }
}
