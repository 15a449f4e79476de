//! Audit rules applied to staged entries right before a save.
//!
//! Services see the whole change tracker and may rewrite rows and entry
//! states. [`EntityAuditService`] stamps creation and modification fields,
//! fills in the tenant of new rows and turns deletes of soft-deletable rows
//! into flag updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::model::Model;
use crate::session::{ChangeTracker, EntryState};

/// Who is saving, for which tenant, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditContext {
    pub user_id: Value,
    pub tenant_id: Option<Uuid>,
    pub now: DateTime<Utc>,
}

impl AuditContext {
    pub fn new(
        user_id: &impl Serialize,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            user_id: serde_json::to_value(user_id)?,
            tenant_id,
            now,
        })
    }
}

/// Source of the audit timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[async_trait]
pub trait AuditService: Send + Sync {
    async fn apply_audit_rules(
        &self,
        model: &Model,
        tracker: &mut ChangeTracker,
        ctx: &AuditContext,
    ) -> Result<(), RepositoryError>;
}

/// Default audit rules driven by each entity's capability fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityAuditService;

#[async_trait]
impl AuditService for EntityAuditService {
    async fn apply_audit_rules(
        &self,
        model: &Model,
        tracker: &mut ChangeTracker,
        ctx: &AuditContext,
    ) -> Result<(), RepositoryError> {
        let now = serde_json::to_value(ctx.now)?;
        let user = ctx.user_id.clone();
        let mut soft_deleted = 0usize;

        for entry in tracker.entries_mut() {
            let state = entry.state();
            if !state.is_pending() {
                continue;
            }
            let caps = model.entity_type(entry.table())?.capabilities().clone();

            if state == EntryState::Added {
                if let Some(field) = caps.created_at {
                    entry.set_field(field, now.clone());
                }
                if let Some(field) = caps.created_by {
                    entry.set_field(field, user.clone());
                }
                if let (Some(field), Some(tenant)) = (caps.tenant, ctx.tenant_id) {
                    if is_unset_tenant(entry.row().get(field)) {
                        entry.set_field(field, Value::String(tenant.to_string()));
                    }
                }
            }

            if let Some(field) = caps.modified_at {
                if state == EntryState::Modified || caps.created_at.is_none() {
                    entry.set_field(field, now.clone());
                }
            }
            if let Some(field) = caps.modified_by {
                if state == EntryState::Modified || caps.created_by.is_none() {
                    entry.set_field(field, user.clone());
                }
            }

            if state == EntryState::Deleted {
                if let Some(flag) = caps.soft_delete {
                    entry.set_state(EntryState::Modified);
                    entry.set_field(flag, Value::Bool(true));
                    if let Some(field) = caps.deleted_at {
                        entry.set_field(field, now.clone());
                    }
                    if let Some(field) = caps.deleted_by {
                        entry.set_field(field, user.clone());
                    }
                    soft_deleted += 1;
                }
            }
        }

        debug!(soft_deleted, "applied audit rules");
        Ok(())
    }
}

fn is_unset_tenant(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.parse::<Uuid>().is_ok_and(|id| id.is_nil()),
        _ => false,
    }
}
