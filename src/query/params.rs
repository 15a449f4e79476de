use serde::{Deserialize, Deserializer, Serialize};

use super::filter::Filter;
use super::sort::SortDirection;
use crate::entity::Entity;

pub const DEFAULT_PAGE_NUMBER: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Paging, sorting, search and id selection for a list request.
///
/// Page number and size below 1 fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams<K, F = ()> {
    #[serde(deserialize_with = "page_number_or_default")]
    page_number: u32,
    #[serde(deserialize_with = "page_size_or_default")]
    page_size: u32,
    pub sort_by: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub search: Option<String>,
    pub typeahead: Option<String>,
    pub ids: Option<Vec<K>>,
    pub invert_ids: bool,
    /// `Some(true)` only deleted rows, `Some(false)` only live rows, `None` both.
    pub is_deleted: Option<bool>,
    pub filters: Option<F>,
}

impl<K, F> Default for QueryParams<K, F> {
    fn default() -> Self {
        Self {
            page_number: DEFAULT_PAGE_NUMBER,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: None,
            sort_direction: None,
            search: None,
            typeahead: None,
            ids: None,
            invert_ids: false,
            is_deleted: None,
            filters: None,
        }
    }
}

fn clamp(value: i64, default: u32) -> u32 {
    if value < 1 {
        default
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

fn page_number_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(clamp(i64::deserialize(d)?, DEFAULT_PAGE_NUMBER))
}

fn page_size_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(clamp(i64::deserialize(d)?, DEFAULT_PAGE_SIZE))
}

impl<K, F> QueryParams<K, F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn set_page_number(&mut self, page_number: i64) {
        self.page_number = clamp(page_number, DEFAULT_PAGE_NUMBER);
    }

    pub fn set_page_size(&mut self, page_size: i64) {
        self.page_size = clamp(page_size, DEFAULT_PAGE_SIZE);
    }

    pub fn page(mut self, page_number: i64, page_size: i64) -> Self {
        self.set_page_number(page_number);
        self.set_page_size(page_size);
        self
    }

    pub fn sort(mut self, sort_by: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(sort_by.into());
        self.sort_direction = Some(direction);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn typeahead(mut self, typeahead: impl Into<String>) -> Self {
        self.typeahead = Some(typeahead.into());
        self
    }

    pub fn ids(mut self, ids: Vec<K>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn excluding_ids(mut self, ids: Vec<K>) -> Self {
        self.ids = Some(ids);
        self.invert_ids = true;
        self
    }

    pub fn deleted(mut self, is_deleted: Option<bool>) -> Self {
        self.is_deleted = is_deleted;
        self
    }

    pub fn filters(mut self, filters: F) -> Self {
        self.filters = Some(filters);
        self
    }

    /// An explicit, non-inverted, empty id list selects nothing.
    pub fn is_empty_query(&self) -> bool {
        !self.invert_ids && self.ids.as_ref().is_some_and(|ids| ids.is_empty())
    }

    /// Rows to skip before the requested page.
    pub fn skip(&self) -> usize {
        let skip = u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size);
        usize::try_from(skip).unwrap_or(usize::MAX)
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub results: Vec<T>,
    pub total_count: usize,
    pub page_number: u32,
    pub page_size: u32,
}

impl<T> PagedResult<T> {
    pub fn empty(page_number: u32, page_size: u32) -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
            page_number,
            page_size,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            results: self.results.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_number: self.page_number,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextMatch {
    #[default]
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

/// Text match on one string property, for entity-specific filter payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringPropertyFilter {
    pub value: String,
    #[serde(default)]
    pub mode: TextMatch,
    #[serde(default)]
    pub ignore_case: bool,
}

impl StringPropertyFilter {
    pub fn new(value: impl Into<String>, mode: TextMatch) -> Self {
        Self {
            value: value.into(),
            mode,
            ignore_case: false,
        }
    }

    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let (candidate, value) = if self.ignore_case {
            (candidate.to_lowercase(), self.value.to_lowercase())
        } else {
            (candidate.to_string(), self.value.clone())
        };
        match self.mode {
            TextMatch::Equals => candidate == value,
            TextMatch::Contains => candidate.contains(&value),
            TextMatch::StartsWith => candidate.starts_with(&value),
            TextMatch::EndsWith => candidate.ends_with(&value),
        }
    }

    pub fn to_filter<E: Entity>(
        &self,
        selector: impl Fn(&E) -> String + Send + Sync + 'static,
    ) -> Filter<E> {
        let this = self.clone();
        Filter::predicate(move |e| this.matches(&selector(e)))
    }
}

/// Membership in an explicit set of values. An empty selection filters nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionFilter<T> {
    pub selection: Vec<T>,
}

impl<T: PartialEq + Clone + Send + Sync + 'static> SelectionFilter<T> {
    pub fn new(selection: Vec<T>) -> Self {
        Self { selection }
    }

    pub fn to_filter<E: Entity>(&self, selector: impl Fn(&E) -> T + Send + Sync + 'static) -> Filter<E> {
        if self.selection.is_empty() {
            return Filter::True;
        }
        let selection = self.selection.clone();
        Filter::predicate(move |e| selection.contains(&selector(e)))
    }
}
