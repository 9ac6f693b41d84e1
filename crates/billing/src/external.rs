//! External collaborator ports
//!
//! The billing core consults the organization directory, the audit log and
//! the enterprise compliance gate, but does not own them. Each is a trait so
//! the platform wires its real services in and tests substitute in-memory
//! doubles.

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;
use veridex_shared::PlanType;

use crate::error::{BillingError, BillingResult};

/// Organization record as the directory exposes it to billing.
#[derive(Debug, Clone)]
pub struct OrganizationRecord {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub plan_type: PlanType,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Plan fields pushed back into the organization record after settlement.
#[derive(Debug, Clone)]
pub struct OrganizationPlanUpdate {
    pub plan_type: PlanType,
    pub plan_status: String,
    pub duration_days: i64,
}

/// Lookup/update port into the organization directory.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn get_organization(&self, id: Uuid) -> BillingResult<Option<OrganizationRecord>>;

    async fn update_organization_plan(
        &self,
        id: Uuid,
        update: OrganizationPlanUpdate,
    ) -> BillingResult<()>;
}

/// One audit entry for an admin-triggered billing mutation.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub action: String,
    pub entity: String,
    pub target_id: Uuid,
    pub details: String,
    pub snapshot: Value,
}

/// Append-only audit log port.
///
/// Calls are fire-and-forget from billing's perspective: a logging failure
/// must never roll back the billing mutation it describes.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_action(&self, entry: AuditEntry) -> BillingResult<()>;
}

/// Compliance check request for ENTERPRISE-plan organizations.
#[derive(Debug, Clone)]
pub struct ComplianceRequest {
    pub enterprise_id: Uuid,
    pub action: String,
    pub actor_role: String,
}

/// Enterprise compliance gate, consulted before checkout for organizations
/// already on the enterprise plan.
#[async_trait]
pub trait ComplianceGate: Send + Sync {
    async fn assert_compliance(&self, request: ComplianceRequest) -> BillingResult<()>;
}

/// Gate that permits everything; for deployments without a compliance
/// service and for tests.
#[derive(Debug, Clone, Default)]
pub struct AllowAllCompliance;

#[async_trait]
impl ComplianceGate for AllowAllCompliance {
    async fn assert_compliance(&self, _request: ComplianceRequest) -> BillingResult<()> {
        Ok(())
    }
}

/// Audit sink that writes entries to the process log.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log_action(&self, entry: AuditEntry) -> BillingResult<()> {
        tracing::info!(
            actor_id = %entry.actor_id,
            action = %entry.action,
            entity = %entry.entity,
            target_id = %entry.target_id,
            details = %entry.details,
            "Audit entry"
        );
        Ok(())
    }
}

/// In-memory directory for tests and single-node demo deployments.
#[derive(Default)]
pub struct InMemoryDirectory {
    orgs: tokio::sync::Mutex<std::collections::HashMap<Uuid, OrganizationRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, record: OrganizationRecord) {
        self.orgs.lock().await.insert(record.id, record);
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryDirectory {
    async fn get_organization(&self, id: Uuid) -> BillingResult<Option<OrganizationRecord>> {
        Ok(self.orgs.lock().await.get(&id).cloned())
    }

    async fn update_organization_plan(
        &self,
        id: Uuid,
        update: OrganizationPlanUpdate,
    ) -> BillingResult<()> {
        let mut orgs = self.orgs.lock().await;
        let org = orgs
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(format!("organization {id}")))?;
        org.plan_type = update.plan_type;
        Ok(())
    }
}
