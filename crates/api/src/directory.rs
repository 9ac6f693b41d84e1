//! Postgres-backed collaborator ports
//!
//! The organization directory and audit log live outside the billing core;
//! these implementations bridge its ports onto the platform tables.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;
use veridex_billing::external::{
    AuditEntry, AuditLog, OrganizationDirectory, OrganizationPlanUpdate, OrganizationRecord,
};
use veridex_billing::{BillingError, BillingResult};
use veridex_shared::PlanType;

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    address: Option<String>,
    phone: Option<String>,
    plan_type: String,
    deleted_at: Option<OffsetDateTime>,
}

#[async_trait]
impl OrganizationDirectory for PgDirectory {
    async fn get_organization(&self, id: Uuid) -> BillingResult<Option<OrganizationRecord>> {
        let row: Option<OrganizationRow> = sqlx::query_as(
            "SELECT id, name, email, address, phone, plan_type, deleted_at \
             FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let plan_type = PlanType::from_str(&r.plan_type).ok_or_else(|| {
                BillingError::Database(format!("unknown plan type '{}'", r.plan_type))
            })?;
            Ok(OrganizationRecord {
                id: r.id,
                name: r.name,
                email: r.email,
                address: r.address,
                phone: r.phone,
                plan_type,
                deleted_at: r.deleted_at,
            })
        })
        .transpose()
    }

    async fn update_organization_plan(
        &self,
        id: Uuid,
        update: OrganizationPlanUpdate,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET plan_type = $2, plan_status = $3, plan_duration_days = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.plan_type.as_str())
        .bind(&update.plan_status)
        .bind(update.duration_days)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn log_action(&self, entry: AuditEntry) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, actor_id, action, entity, target_id, details, snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.target_id)
        .bind(&entry.details)
        .bind(&entry.snapshot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
