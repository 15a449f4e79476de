//! Query building blocks and the query composer.
//!
//! A [`Query`] is a plain value: filter expressions, eager-load paths, an
//! ordering and a window. Repositories build one per call and hand it to the
//! session for execution. [`QueryComposer`] turns [`QueryParams`] into the
//! filter/search/sort/page stages of such a query.
//!
//! ## Example
//!
//! ```ignore
//! let query = Query::<Company>::new()
//!     .include("departments.teams")
//!     .filter(Filter::predicate(|c: &Company| c.name.starts_with("A")))
//!     .order_by(SortSelector::by(|c: &Company| c.name.clone()), false)
//!     .window(0, Some(20));
//! let companies = session.list(&query).await?;
//! ```

mod composer;
mod filter;
mod params;
mod search;
mod sort;

use serde_json::{Map, Value};

use crate::entity::Entity;

pub use composer::{QueryComposer, SearchSettings};
pub use filter::Filter;
pub use params::{
    PagedResult, QueryParams, SelectionFilter, StringPropertyFilter, TextMatch,
    DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE,
};
pub use search::{contains_ignore_case, starts_with_ignore_case, tokenize_search, TextPredicate};
pub use sort::{unsafe_dynamic_sort, SortDirection, SortFields, SortSelector, SortValue, Sorting};

pub(crate) use sort::find_field;

/// Eager-load specification: navigation paths from the queried root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Includes {
    paths: Vec<Vec<String>>,
}

impl Includes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dotted path such as `"departments.teams.members"`.
    pub fn path(mut self, path: &str) -> Self {
        self.push(path);
        self
    }

    pub fn push(&mut self, path: &str) {
        let steps: Vec<String> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !steps.is_empty() && !self.paths.contains(&steps) {
            self.paths.push(steps);
        }
    }

    pub fn extend(&mut self, other: &Includes) {
        for path in &other.paths {
            if !self.paths.contains(path) {
                self.paths.push(path.clone());
            }
        }
    }

    pub fn paths(&self) -> &[Vec<String>] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub struct OrderBy<E> {
    pub selector: SortSelector<E>,
    pub descending: bool,
}

impl<E> Clone for OrderBy<E> {
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
            descending: self.descending,
        }
    }
}

impl<E> std::fmt::Debug for OrderBy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBy")
            .field("selector", &self.selector)
            .field("descending", &self.descending)
            .finish()
    }
}

/// A query over one entity type.
pub struct Query<E> {
    filters: Vec<Filter<E>>,
    includes: Includes,
    order: Option<OrderBy<E>>,
    skip: usize,
    take: Option<usize>,
    tracking: bool,
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            includes: self.includes.clone(),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
            tracking: self.tracking,
        }
    }
}

impl<E> std::fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("filters", &self.filters)
            .field("includes", &self.includes)
            .field("order", &self.order)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("tracking", &self.tracking)
            .finish()
    }
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Query<E> {
    /// An unfiltered, untracked query.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            includes: Includes::default(),
            order: None,
            skip: 0,
            take: None,
            tracking: false,
        }
    }

    pub fn filter(mut self, filter: Filter<E>) -> Self {
        if !matches!(filter, Filter::True) {
            self.filters.push(filter);
        }
        self
    }

    pub fn include(mut self, path: &str) -> Self {
        self.includes.push(path);
        self
    }

    pub fn with_includes(mut self, includes: &Includes) -> Self {
        self.includes.extend(includes);
        self
    }

    pub fn order_by(mut self, selector: SortSelector<E>, descending: bool) -> Self {
        self.order = Some(OrderBy {
            selector,
            descending,
        });
        self
    }

    pub fn window(mut self, skip: usize, take: Option<usize>) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    /// The same query without its page window.
    pub fn unpaged(&self) -> Self {
        let mut query = self.clone();
        query.skip = 0;
        query.take = None;
        query
    }

    /// Results are attached to the session's change tracker.
    pub fn tracked(mut self) -> Self {
        self.tracking = true;
        self
    }

    pub fn filters(&self) -> &[Filter<E>] {
        &self.filters
    }

    pub fn includes(&self) -> &Includes {
        &self.includes
    }

    pub fn order(&self) -> Option<&OrderBy<E>> {
        self.order.as_ref()
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn take(&self) -> Option<usize> {
        self.take
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn matches(&self, entity: &E, row: &Map<String, Value>) -> bool {
        self.filters.iter().all(|f| f.matches(entity, row))
    }
}
