//! Unit of work.
//!
//! Batches everything repositories staged on one [`Session`] into a single
//! atomic save. Before the save, the acting user and tenant are resolved
//! once and every registered [`AuditService`] runs over the staged entries.
//!
//! ## Example
//!
//! ```ignore
//! let uow = UnitOfWork::new(session.clone(), StaticUser(user_id))
//!     .with_tenant_provider(Arc::new(StaticTenant(tenant_id)));
//!
//! companies.create(company).await?;
//! uow.save_changes().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditContext, AuditService, Clock, EntityAuditService, SystemClock};
use crate::error::RepositoryError;
use crate::session::{ChangeTracker, Session};

/// Resolves the user performing the current operation.
#[async_trait]
pub trait CurrentUserProvider<U>: Send + Sync {
    async fn current_user_id(&self) -> Result<U, RepositoryError>;
}

/// Resolves the tenant the current operation runs for.
#[async_trait]
pub trait TenantIdProvider: Send + Sync {
    async fn tenant_id(&self) -> Result<Uuid, RepositoryError>;
}

/// A fixed user id.
#[derive(Debug, Clone)]
pub struct StaticUser<U>(pub U);

#[async_trait]
impl<U: Clone + Send + Sync> CurrentUserProvider<U> for StaticUser<U> {
    async fn current_user_id(&self) -> Result<U, RepositoryError> {
        Ok(self.0.clone())
    }
}

/// A fixed tenant id.
#[derive(Debug, Clone, Copy)]
pub struct StaticTenant(pub Uuid);

#[async_trait]
impl TenantIdProvider for StaticTenant {
    async fn tenant_id(&self) -> Result<Uuid, RepositoryError> {
        Ok(self.0)
    }
}

/// Saves or discards the changes staged on a session.
pub struct UnitOfWork<U = Uuid> {
    session: Arc<Session>,
    users: Arc<dyn CurrentUserProvider<U>>,
    tenants: Option<Arc<dyn TenantIdProvider>>,
    audit_services: Vec<Arc<dyn AuditService>>,
    clock: Arc<dyn Clock>,
}

impl<U: Serialize + Send + Sync + 'static> UnitOfWork<U> {
    /// Uses [`EntityAuditService`] and the system clock.
    pub fn new(session: Arc<Session>, users: impl CurrentUserProvider<U> + 'static) -> Self {
        Self {
            session,
            users: Arc::new(users),
            tenants: None,
            audit_services: vec![Arc::new(EntityAuditService)],
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_tenant_provider(mut self, tenants: Arc<dyn TenantIdProvider>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    /// Replaces the audit services. They run in the given order.
    pub fn with_audit_services(mut self, services: Vec<Arc<dyn AuditService>>) -> Self {
        self.audit_services = services;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Resolves the audit context, then saves. Returns the number of writes.
    pub async fn save_changes(&self) -> Result<usize, RepositoryError> {
        self.session.ensure_active()?;
        let user_id = self.users.current_user_id().await?;
        let tenant_id = match &self.tenants {
            Some(tenants) => Some(tenants.tenant_id().await?),
            None => None,
        };
        let ctx = AuditContext::new(&user_id, tenant_id, self.clock.now())?;
        self.save_with_context(&ctx).await
    }

    /// Runs the audit services with an explicit context and persists the
    /// batch. The tracker is cleared only when the save succeeds; on failure
    /// it is restored to its state before auditing.
    pub async fn save_with_context(&self, ctx: &AuditContext) -> Result<usize, RepositoryError> {
        let mut tracker = self.session.tracker().await;
        let staged = tracker.clone();

        match self.audit_and_persist(&mut tracker, ctx).await {
            Ok(count) => Ok(count),
            Err(err) => {
                *tracker = staged;
                if err.is_conflict() {
                    warn!(error = %err, "save rejected by optimistic concurrency check");
                }
                Err(err)
            }
        }
    }

    async fn audit_and_persist(
        &self,
        tracker: &mut ChangeTracker,
        ctx: &AuditContext,
    ) -> Result<usize, RepositoryError> {
        for service in &self.audit_services {
            service
                .apply_audit_rules(self.session.model(), tracker, ctx)
                .await?;
        }
        self.session.persist(tracker).await
    }

    /// Detaches everything staged since the last save.
    pub async fn rollback(&self) {
        let mut tracker = self.session.tracker().await;
        let discarded = tracker.len();
        tracker.clear();
        debug!(discarded, "rolled back unit of work");
    }
}
