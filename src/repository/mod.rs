//! Generic repository.
//!
//! [`Repository`] implements every read and write once, for any entity type.
//! Per-entity behavior lives in a [`RepositoryConfig`]: include groups,
//! search and typeahead predicates, sorting, entity-specific filters and the
//! access-rights policy. Reads run through the query composer; writes stage
//! changes on the shared session until the unit of work saves.
//!
//! ## Example
//!
//! ```ignore
//! struct Companies;
//!
//! impl RepositoryConfig for Companies {
//!     type Entity = Company;
//!     type Filters = ();
//!     type Policy = AccessPolicy;
//!
//!     fn owned_includes(&self) -> Includes {
//!         Includes::new().path("departments.teams")
//!     }
//! }
//!
//! let repo = Repository::new(session.clone(), Companies, RepositoryDependencies::default());
//! let page = repo.get(&QueryParams::new().page(1, 50), Default::default()).await?;
//! ```

mod options;
mod projection;

use std::any::type_name;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::entity::{Entity, KeyAccessor, KeyOf, PrimaryKey};
use crate::error::{DefaultErrorFactory, ErrorFactory, RepositoryError};
use crate::model::EntityType;
use crate::owned::{OwnedNode, OwnedPropertiesExtractor};
use crate::query::{
    Filter, Includes, PagedResult, Query, QueryComposer, QueryParams, SearchSettings,
    SortDirection, SortSelector, Sorting, TextPredicate,
};
use crate::reconcile::{current_graph, is_graph_modified, Reconciler};
use crate::session::{EntryState, Session};
use crate::store::Row;
use crate::unit_of_work::TenantIdProvider;

pub(crate) use options::IncludeFlags;
pub use options::{AccessPolicy, RepositoryQueryOptions};
pub use projection::Projections;

/// Query parameters accepted by the repository built from `C`.
pub type ParamsOf<C> =
    QueryParams<KeyOf<<C as RepositoryConfig>::Entity>, <C as RepositoryConfig>::Filters>;

/// Query options accepted by the repository built from `C`.
pub type OptionsOf<C> = RepositoryQueryOptions<<C as RepositoryConfig>::Policy>;

/// Per-entity customization points. Every hook has a neutral default.
pub trait RepositoryConfig: Send + Sync + 'static {
    type Entity: Entity;

    /// Entity-specific filter payload carried in [`QueryParams::filters`].
    type Filters: Send + Sync;

    /// Access-rights payload carried in [`RepositoryQueryOptions::access_policy`].
    type Policy: Send + Sync;

    /// Navigations created, updated and deleted together with the root.
    fn owned_includes(&self) -> Includes {
        Includes::new()
    }

    fn common_includes(&self) -> Includes {
        Includes::new()
    }

    fn detailed_includes(&self) -> Includes {
        Includes::new()
    }

    fn search(&self) -> Option<TextPredicate<Self::Entity>> {
        None
    }

    fn typeahead(&self) -> Option<TextPredicate<Self::Entity>> {
        None
    }

    fn sorting(&self) -> Sorting<Self::Entity> {
        Sorting::Unsupported
    }

    fn default_sort(&self) -> SortSelector<Self::Entity> {
        SortSelector::Key
    }

    fn default_sort_direction(&self) -> SortDirection {
        SortDirection::Asc
    }

    /// Runs first in the list pipeline, before ids and soft delete.
    fn apply_filters(
        &self,
        query: Query<Self::Entity>,
        _filters: &Self::Filters,
    ) -> Result<Query<Self::Entity>, RepositoryError> {
        Ok(query)
    }

    fn apply_access_policy(
        &self,
        query: Query<Self::Entity>,
        _policy: &Self::Policy,
    ) -> Query<Self::Entity> {
        query
    }
}

/// Collaborators shared by all repositories of an application.
#[derive(Clone)]
pub struct RepositoryDependencies {
    pub projections: Projections,
    pub tenant_provider: Option<Arc<dyn TenantIdProvider>>,
    pub errors: Arc<dyn ErrorFactory>,
}

impl Default for RepositoryDependencies {
    fn default() -> Self {
        Self {
            projections: Projections::default(),
            tenant_provider: None,
            errors: Arc::new(DefaultErrorFactory),
        }
    }
}

impl RepositoryDependencies {
    pub fn with_projections(mut self, projections: Projections) -> Self {
        self.projections = projections;
        self
    }

    pub fn with_tenant_provider(mut self, provider: Arc<dyn TenantIdProvider>) -> Self {
        self.tenant_provider = Some(provider);
        self
    }

    pub fn with_error_factory(mut self, errors: Arc<dyn ErrorFactory>) -> Self {
        self.errors = errors;
        self
    }
}

/// A staged entity and a deferred accessor for its key.
#[derive(Clone, Debug)]
pub struct CreateResult<E: Entity> {
    pub entity: E,
    key: KeyAccessor<E::Key>,
}

impl<E: Entity> CreateResult<E> {
    /// The key once the unit of work has saved; `None` before that for
    /// store-generated keys.
    pub fn key(&self) -> Result<Option<E::Key>, RepositoryError> {
        self.key.get()
    }

    pub fn key_accessor(&self) -> &KeyAccessor<E::Key> {
        &self.key
    }

    pub fn into_parts(self) -> (E, KeyAccessor<E::Key>) {
        (self.entity, self.key)
    }
}

/// Data access for one entity type over a shared session.
pub struct Repository<C: RepositoryConfig> {
    session: Arc<Session>,
    config: C,
    deps: RepositoryDependencies,
    settings: SearchSettings<C::Entity>,
}

impl<C: RepositoryConfig> Repository<C> {
    pub fn new(session: Arc<Session>, config: C, deps: RepositoryDependencies) -> Self {
        let settings = SearchSettings {
            search: config.search(),
            typeahead: config.typeahead(),
            sorting: config.sorting(),
            default_sort: config.default_sort(),
            default_direction: config.default_sort_direction(),
        };
        Self {
            session,
            config,
            deps,
            settings,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    // ========================================================================
    // Reads by key
    // ========================================================================

    /// Loads one entity with the detailed view unless `options` says otherwise.
    pub async fn get_by_id(
        &self,
        id: &KeyOf<C::Entity>,
        options: OptionsOf<C>,
    ) -> Result<Option<C::Entity>, RepositoryError> {
        let query = self.query_by_id(id, &options, IncludeFlags::DETAILED).await?;
        let found = self.session.first(&query).await?;
        if found.is_none() && options.required {
            return Err(self.not_found(Some(id)));
        }
        Ok(found)
    }

    pub async fn get_by_id_projected<T: 'static>(
        &self,
        id: &KeyOf<C::Entity>,
        options: OptionsOf<C>,
    ) -> Result<Option<T>, RepositoryError> {
        let project = self.projection::<T>()?;
        let query = self.query_by_id(id, &options, IncludeFlags::DETAILED).await?;
        let found = self.session.first(&query).await?;
        match found {
            Some(entity) => Ok(Some(project(&entity))),
            None if options.required => Err(self.not_found(Some(id))),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, id: &KeyOf<C::Entity>) -> Result<bool, RepositoryError> {
        let query = self
            .query_by_id(id, &OptionsOf::<C>::default(), IncludeFlags::BARE)
            .await?;
        self.session.any(&query).await
    }

    /// Fails with not-found when the entity does not exist.
    pub async fn must_exist(&self, id: &KeyOf<C::Entity>) -> Result<(), RepositoryError> {
        if self.exists(id).await? {
            Ok(())
        } else {
            Err(self.not_found(Some(id)))
        }
    }

    /// The subset of `ids` that exist. With `required`, every id must exist.
    pub async fn exists_many(
        &self,
        ids: &[KeyOf<C::Entity>],
        options: OptionsOf<C>,
    ) -> Result<Vec<KeyOf<C::Entity>>, RepositoryError> {
        let ty = self.entity_type()?;
        let query = self
            .base_query(&options, IncludeFlags::BARE)
            .await?
            .filter(Filter::by_ids(ty, ids, false));
        let existing: Vec<_> = self
            .session
            .list(&query)
            .await?
            .iter()
            .map(<C::Entity as Entity>::key)
            .collect();

        if options.required && existing.len() != ids.len() {
            return Err(self.not_found(None));
        }
        Ok(existing)
    }

    /// Keys of the entities matching the filtering stages of `params`.
    /// With `required`, at least one must match.
    pub async fn exists_many_by(
        &self,
        params: &ParamsOf<C>,
        options: OptionsOf<C>,
    ) -> Result<Vec<KeyOf<C::Entity>>, RepositoryError> {
        if params.is_empty_query() {
            return self.ensure_any(Vec::new(), options.required);
        }
        let query = self.filtered_query(params, &options).await?;
        let existing = self
            .session
            .list(&query)
            .await?
            .iter()
            .map(<C::Entity as Entity>::key)
            .collect();
        self.ensure_any(existing, options.required)
    }

    // ========================================================================
    // List reads
    // ========================================================================

    /// Every visible entity with owned and common includes.
    pub async fn get_all(&self, options: OptionsOf<C>) -> Result<Vec<C::Entity>, RepositoryError> {
        let query = self.base_query(&options, IncludeFlags::LIST).await?;
        let all = self.session.list(&query).await?;
        self.ensure_any(all, options.required)
    }

    /// One page through the full pipeline: filters, ids, soft delete, search,
    /// typeahead, sort, paging.
    pub async fn get(
        &self,
        params: &ParamsOf<C>,
        options: OptionsOf<C>,
    ) -> Result<PagedResult<C::Entity>, RepositoryError> {
        if params.is_empty_query() {
            let empty = PagedResult::empty(params.page_number(), params.page_size());
            return self.ensure_page(empty, options.required);
        }
        let ty = self.entity_type()?;
        let query = self.base_query(&options, IncludeFlags::DETAILED).await?;
        let query = self.apply_entity_filters(query, params)?;
        let query = self.composer(ty).compose(query, params)?;
        let page = self.paginate(ty, query, params).await?;
        self.ensure_page(page, options.required)
    }

    pub async fn any(&self, params: &ParamsOf<C>, options: OptionsOf<C>) -> Result<bool, RepositoryError> {
        if params.is_empty_query() {
            return if options.required {
                Err(self.not_found(None))
            } else {
                Ok(false)
            };
        }
        let query = self.filtered_query(params, &options).await?;
        let any = self.session.any(&query).await?;
        if options.required && !any {
            return Err(self.not_found(None));
        }
        Ok(any)
    }

    pub async fn count(&self, params: &ParamsOf<C>, options: OptionsOf<C>) -> Result<usize, RepositoryError> {
        if params.is_empty_query() {
            return if options.required {
                Err(self.not_found(None))
            } else {
                Ok(0)
            };
        }
        let query = self.filtered_query(params, &options).await?;
        let count = self.session.count(&query).await?;
        if options.required && count == 0 {
            return Err(self.not_found(None));
        }
        Ok(count)
    }

    /// Like [`get`](Self::get) without includes, mapped through the projection
    /// registered from the entity to `T`.
    pub async fn get_projected<T: 'static>(
        &self,
        params: &ParamsOf<C>,
        options: OptionsOf<C>,
    ) -> Result<PagedResult<T>, RepositoryError> {
        if params.is_empty_query() {
            let empty = PagedResult::empty(params.page_number(), params.page_size());
            return self.ensure_page(empty, options.required);
        }
        let project = self.projection::<T>()?;
        let ty = self.entity_type()?;
        let query = self.base_query(&options, IncludeFlags::BARE).await?;
        let query = self.apply_entity_filters(query, params)?;
        let query = self.composer(ty).compose(query, params)?;
        let page = self.paginate(ty, query, params).await?;
        self.ensure_page(page.map(|entity| project(&entity)), options.required)
    }

    /// Projected page for autocomplete inputs.
    pub async fn autocomplete<T: 'static>(
        &self,
        params: &ParamsOf<C>,
        options: OptionsOf<C>,
    ) -> Result<PagedResult<T>, RepositoryError> {
        self.get_projected(params, options).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Stages `entity` and its owned graph as new.
    ///
    /// The returned entity carries the temporary keys and linked foreign keys
    /// it was staged under, so it can be passed back to [`Self::update`] or
    /// [`Self::is_aggregate_modified`] before the save.
    pub async fn create(&self, entity: C::Entity) -> Result<CreateResult<C::Entity>, RepositoryError> {
        self.session.ensure_active()?;
        let tree = self.owned_tree()?;
        let mut row = to_row(&entity)?;

        let mut tracker = self.session.tracker().await;
        let id = Reconciler::new(self.session.model(), &mut tracker).reconcile(None, &mut row, &tree)?;
        let key = tracker
            .entry(id)
            .map(|entry| KeyAccessor::new(entry.key_cell().clone()))
            .ok_or_else(|| RepositoryError::Storage(format!("staged entry {} vanished", id)))?;

        debug!(table = C::Entity::TABLE, staged = tracker.len(), "staged create");
        let entity = serde_json::from_value(Value::Object(row))?;
        Ok(CreateResult { entity, key })
    }

    /// Reconciles `entity` into the current graph with the same key: the
    /// persisted one with whatever this session already staged on top of it,
    /// or a graph created earlier in the session. Returns the tracked,
    /// updated graph.
    pub async fn update(&self, entity: C::Entity) -> Result<C::Entity, RepositoryError> {
        let ty = self.entity_type()?;
        let key = entity.key();
        if key.is_unset() {
            return Err(RepositoryError::invalid_argument(format!(
                "cannot update {} without a key",
                C::Entity::type_name()
            )));
        }

        let query = Query::new()
            .with_includes(&self.config.owned_includes())
            .filter(Filter::key_eq(ty, &key))
            .tracked();
        let query = self.apply_tenant_filter(query).await?;
        let loaded = self.session.fetch(&query).await?.into_iter().next().map(|(_, row)| row);

        let tree = OwnedPropertiesExtractor::new(self.session.model()).extract(&query)?;
        let mut incoming = to_row(&entity)?;
        let mut tracker = self.session.tracker().await;

        let loaded = match loaded {
            Some(graph) => Some(graph),
            None => tracker
                .find_id_for(ty, &ty.key_of(&incoming))
                .and_then(|id| tracker.entry(id))
                .filter(|entry| entry.state() == EntryState::Added)
                .map(|entry| entry.row().clone()),
        };
        let existing = match loaded {
            Some(graph) => current_graph(self.session.model(), &tracker, &tree, graph)?,
            None => None,
        };
        let Some(mut existing) = existing else {
            return Err(self.not_found(Some(&key)));
        };

        Reconciler::new(self.session.model(), &mut tracker).reconcile(
            Some(&mut existing),
            &mut incoming,
            &tree,
        )?;
        debug!(table = C::Entity::TABLE, key = %key.describe(), pending = tracker.has_changes(), "staged update");
        drop(tracker);

        Ok(serde_json::from_value(Value::Object(existing))?)
    }

    /// Stages `entity` and the owned descendants it carries for removal.
    /// Soft-deletable rows become flag updates when the unit of work saves.
    pub async fn delete(&self, entity: &C::Entity) -> Result<(), RepositoryError> {
        self.session.ensure_active()?;
        let tree = self.owned_tree()?;
        let row = to_row(entity)?;
        let mut tracker = self.session.tracker().await;
        Reconciler::new(self.session.model(), &mut tracker).remove(&row, &tree)?;
        debug!(table = C::Entity::TABLE, key = %entity.key().describe(), "staged delete");
        Ok(())
    }

    /// True when the root or any owned descendant has staged changes.
    pub async fn is_aggregate_modified(&self, entity: &C::Entity) -> Result<bool, RepositoryError> {
        let tree = self.owned_tree()?;
        let row = to_row(entity)?;
        let tracker = self.session.tracker().await;
        is_graph_modified(self.session.model(), &tracker, &tree, &row)
    }

    // ========================================================================
    // Query construction
    // ========================================================================

    fn entity_type(&self) -> Result<&EntityType, RepositoryError> {
        self.session.model().entity::<C::Entity>()
    }

    fn composer<'a>(&'a self, ty: &'a EntityType) -> QueryComposer<'a, C::Entity> {
        QueryComposer::new(ty, &self.settings, self.deps.errors.as_ref())
    }

    fn owned_tree(&self) -> Result<OwnedNode, RepositoryError> {
        OwnedPropertiesExtractor::new(self.session.model())
            .extract_includes(C::Entity::TABLE, &self.config.owned_includes())
    }

    /// Owned, common and detailed includes, then the access policy, then the
    /// tenant filter.
    async fn base_query(
        &self,
        options: &OptionsOf<C>,
        defaults: IncludeFlags,
    ) -> Result<Query<C::Entity>, RepositoryError> {
        let flags = options.resolve(defaults);
        let mut query = Query::new();
        if flags.owned {
            query = query.with_includes(&self.config.owned_includes());
        }
        if flags.common {
            query = query.with_includes(&self.config.common_includes());
        }
        if flags.detailed {
            query = query.with_includes(&self.config.detailed_includes());
        }
        if let Some(policy) = &options.access_policy {
            query = self.config.apply_access_policy(query, policy);
        }
        self.apply_tenant_filter(query).await
    }

    async fn apply_tenant_filter(
        &self,
        query: Query<C::Entity>,
    ) -> Result<Query<C::Entity>, RepositoryError> {
        let ty = self.entity_type()?;
        let (Some(provider), Some(field)) = (&self.deps.tenant_provider, ty.capabilities().tenant) else {
            return Ok(query);
        };
        let tenant = provider.tenant_id().await?;
        Ok(query.filter(Filter::field_eq(field, tenant.to_string())))
    }

    async fn query_by_id(
        &self,
        id: &KeyOf<C::Entity>,
        options: &OptionsOf<C>,
        defaults: IncludeFlags,
    ) -> Result<Query<C::Entity>, RepositoryError> {
        let ty = self.entity_type()?;
        let query = self.base_query(options, defaults).await?;
        Ok(query.filter(Filter::key_eq(ty, id)))
    }

    /// Bare base query with the filtering stages of `params`.
    async fn filtered_query(
        &self,
        params: &ParamsOf<C>,
        options: &OptionsOf<C>,
    ) -> Result<Query<C::Entity>, RepositoryError> {
        let ty = self.entity_type()?;
        let query = self.base_query(options, IncludeFlags::BARE).await?;
        let query = self.apply_entity_filters(query, params)?;
        self.composer(ty).filter(query, params)
    }

    fn apply_entity_filters(
        &self,
        query: Query<C::Entity>,
        params: &ParamsOf<C>,
    ) -> Result<Query<C::Entity>, RepositoryError> {
        match &params.filters {
            Some(filters) => self.config.apply_filters(query, filters),
            None => Ok(query),
        }
    }

    async fn paginate(
        &self,
        ty: &EntityType,
        query: Query<C::Entity>,
        params: &ParamsOf<C>,
    ) -> Result<PagedResult<C::Entity>, RepositoryError> {
        let total_count = self.session.count(&query).await?;
        let results = self
            .session
            .list(&self.composer(ty).paginate(query, params))
            .await?;
        Ok(PagedResult {
            results,
            total_count,
            page_number: params.page_number(),
            page_size: params.page_size(),
        })
    }

    fn projection<T: 'static>(&self) -> Result<Arc<dyn Fn(&C::Entity) -> T + Send + Sync>, RepositoryError> {
        self.deps.projections.mapper::<C::Entity, T>().ok_or_else(|| {
            self.deps.errors.not_implemented(
                format!(
                    "Projections are not available for repository of {}.\nRegister one with Projections::register::<{}, {}>.",
                    C::Entity::type_name(),
                    C::Entity::type_name(),
                    short_type_name::<T>()
                ),
                Vec::new(),
            )
        })
    }

    fn not_found(&self, id: Option<&KeyOf<C::Entity>>) -> RepositoryError {
        self.deps
            .errors
            .not_found(C::Entity::type_name(), id.map(|id| id.describe()))
    }

    fn ensure_any<T>(&self, items: Vec<T>, required: bool) -> Result<Vec<T>, RepositoryError> {
        if required && items.is_empty() {
            Err(self.not_found(None))
        } else {
            Ok(items)
        }
    }

    fn ensure_page<T>(&self, page: PagedResult<T>, required: bool) -> Result<PagedResult<T>, RepositoryError> {
        if required && page.is_empty() {
            Err(self.not_found(None))
        } else {
            Ok(page)
        }
    }
}

fn to_row<E: Entity>(entity: &E) -> Result<Row, RepositoryError> {
    match serde_json::to_value(entity)? {
        Value::Object(row) => Ok(row),
        _ => Err(RepositoryError::invalid_argument(format!(
            "{} does not serialize to an object",
            E::type_name()
        ))),
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
