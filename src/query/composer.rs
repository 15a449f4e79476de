use tracing::{debug, warn};

use super::filter::Filter;
use super::params::QueryParams;
use super::search::{tokenize_search, TextPredicate};
use super::sort::{SortDirection, SortSelector, Sorting};
use super::Query;
use crate::entity::Entity;
use crate::error::{ErrorFactory, RepositoryError};
use crate::model::EntityType;

/// The search, typeahead and sort capabilities a repository registered.
pub struct SearchSettings<E> {
    pub search: Option<TextPredicate<E>>,
    pub typeahead: Option<TextPredicate<E>>,
    pub sorting: Sorting<E>,
    pub default_sort: SortSelector<E>,
    pub default_direction: SortDirection,
}

impl<E> Default for SearchSettings<E> {
    fn default() -> Self {
        Self {
            search: None,
            typeahead: None,
            sorting: Sorting::Unsupported,
            default_sort: SortSelector::Key,
            default_direction: SortDirection::Asc,
        }
    }
}

/// Applies the request stages of a list query in their fixed order:
/// ids, soft delete, search, typeahead, sort, then paging.
///
/// Entity-specific filters run before the composer, in the repository.
pub struct QueryComposer<'a, E> {
    ty: &'a EntityType,
    settings: &'a SearchSettings<E>,
    errors: &'a dyn ErrorFactory,
}

impl<'a, E: Entity> QueryComposer<'a, E> {
    pub fn new(
        ty: &'a EntityType,
        settings: &'a SearchSettings<E>,
        errors: &'a dyn ErrorFactory,
    ) -> Self {
        Self {
            ty,
            settings,
            errors,
        }
    }

    /// Every stage except paging.
    pub fn compose<F>(
        &self,
        query: Query<E>,
        params: &QueryParams<E::Key, F>,
    ) -> Result<Query<E>, RepositoryError> {
        let query = self.filter(query, params)?;
        let query = self.sort(query, params.sort_by.as_deref(), params.sort_direction)?;
        debug!(table = self.ty.table(), filters = query.filters().len(), "composed query");
        Ok(query)
    }

    /// The filtering stages only. Counts and existence checks skip sorting.
    pub fn filter<F>(
        &self,
        query: Query<E>,
        params: &QueryParams<E::Key, F>,
    ) -> Result<Query<E>, RepositoryError> {
        let query = self.filter_by_ids(query, params.ids.as_deref(), params.invert_ids);
        let query = self.filter_deleted(query, params.is_deleted);
        let query = self.search(query, params.search.as_deref())?;
        self.typeahead(query, params.typeahead.as_deref())
    }

    /// No list leaves the query untouched, as does an empty inverted list.
    pub fn filter_by_ids(&self, query: Query<E>, ids: Option<&[E::Key]>, invert: bool) -> Query<E> {
        match ids {
            None => query,
            Some([]) if invert => query,
            Some(ids) => query.filter(Filter::by_ids(self.ty, ids, invert)),
        }
    }

    /// No-op for entities without a soft-delete flag.
    pub fn filter_deleted(&self, query: Query<E>, is_deleted: Option<bool>) -> Query<E> {
        match (self.ty.capabilities().soft_delete, is_deleted) {
            (Some(field), Some(flag)) => query.filter(Filter::field_eq(field, flag)),
            _ => query,
        }
    }

    /// Every whitespace-separated token must match the search predicate.
    pub fn search(&self, query: Query<E>, text: Option<&str>) -> Result<Query<E>, RepositoryError> {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return Ok(query);
        };
        let Some(predicate) = &self.settings.search else {
            warn!(table = self.ty.table(), "search requested but not supported");
            return Err(self
                .errors
                .not_implemented("Searching is not supported.".into(), Vec::new()));
        };

        let filter = tokenize_search(text)
            .iter()
            .fold(Filter::True, |acc, token| acc.and(predicate(token.as_str())));
        Ok(query.filter(filter))
    }

    pub fn typeahead(&self, query: Query<E>, prefix: Option<&str>) -> Result<Query<E>, RepositoryError> {
        let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
            return Ok(query);
        };
        let Some(predicate) = &self.settings.typeahead else {
            warn!(table = self.ty.table(), "typeahead requested but not supported");
            return Err(self
                .errors
                .not_implemented("Typeahead is not supported.".into(), Vec::new()));
        };
        Ok(query.filter(predicate(prefix)))
    }

    /// Resolves the requested field against the repository's sorting mode,
    /// or falls back to the default key and direction.
    pub fn sort(
        &self,
        query: Query<E>,
        sort_by: Option<&str>,
        direction: Option<SortDirection>,
    ) -> Result<Query<E>, RepositoryError> {
        let direction = match direction {
            None | Some(SortDirection::NotSet) => self.settings.default_direction,
            Some(d) => d,
        };

        let selector = match sort_by.map(str::trim).filter(|s| !s.is_empty()) {
            None => self.settings.default_sort.clone(),
            Some(name) => self.resolve_sort_field(name)?,
        };

        Ok(match direction {
            SortDirection::NotSet => query,
            SortDirection::Asc => query.order_by(selector, false),
            SortDirection::Desc => query.order_by(selector, true),
        })
    }

    fn resolve_sort_field(&self, name: &str) -> Result<SortSelector<E>, RepositoryError> {
        match &self.settings.sorting {
            Sorting::Unsupported => {
                warn!(table = self.ty.table(), field = name, "sorting requested but not supported");
                Err(self.errors.not_implemented(
                    "Ordering is not supported for this entity. To enable support you can override RepositoryConfig::sorting."
                        .into(),
                    Vec::new(),
                ))
            }
            Sorting::Dynamic => Ok(super::unsafe_dynamic_sort(name)),
            Sorting::AllowList(fields) => {
                fields.check()?;
                fields.get(name).cloned().ok_or_else(|| {
                    let supported = fields.names();
                    warn!(table = self.ty.table(), field = name, "unsupported sort field");
                    self.errors.not_implemented(
                        format!(
                            "Sorting parameter \"{}\" is not supported!\nSupported parameters: {}",
                            name,
                            supported.join(", ")
                        ),
                        supported,
                    )
                })
            }
        }
    }

    /// Window `[(page - 1) * size, page * size)`.
    pub fn paginate<F>(&self, query: Query<E>, params: &QueryParams<E::Key, F>) -> Query<E> {
        let size = usize::try_from(params.page_size()).unwrap_or(usize::MAX);
        query.window(params.skip(), Some(size))
    }
}
