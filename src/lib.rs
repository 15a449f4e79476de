//! Generic repository and unit of work over plain serde structs.
//!
//! Entities describe their key, owned navigations and capabilities (soft
//! delete, tenancy, audit fields, row versions) through [`Entity`]. A
//! [`Repository`] then offers composable paged queries, projections and
//! aggregate-aware create/update/delete on top of a [`Session`], and a
//! [`UnitOfWork`] audits and saves everything atomically.

pub mod audit;
pub mod entity;
mod error;
pub mod etag;
pub mod model;
pub mod owned;
pub mod query;
pub mod reconcile;
pub mod repository;
pub mod session;
pub mod store;
pub mod unit_of_work;

pub use audit::{AuditContext, AuditService, Clock, EntityAuditService, FixedClock, SystemClock};
pub use entity::{Entity, KeyAccessor, KeyOf, PrimaryKey, ScalarKey};
pub use error::{DefaultErrorFactory, ErrorFactory, RepositoryError};
pub use model::{EntityType, Model};
pub use query::{
    Filter, Includes, PagedResult, Query, QueryParams, SelectionFilter, SortDirection, SortFields,
    SortSelector, Sorting, StringPropertyFilter, TextMatch,
};
pub use repository::{
    AccessPolicy, CreateResult, Projections, Repository, RepositoryConfig,
    RepositoryDependencies, RepositoryQueryOptions,
};
pub use session::Session;
pub use store::{InMemoryStore, Store};
pub use unit_of_work::{CurrentUserProvider, StaticTenant, StaticUser, TenantIdProvider, UnitOfWork};

/// `#[derive(Entity)]`, generating the descriptor from `#[entity(...)]` attributes.
pub use generic_repo_macros::Entity;
