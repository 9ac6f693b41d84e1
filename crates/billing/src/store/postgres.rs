//! Postgres store
//!
//! Runtime-checked sqlx queries; enums are stored as lowercase TEXT and the
//! invoice purpose as JSONB. The settlement transitions lock the attempt row
//! (`SELECT ... FOR UPDATE`) inside one transaction so concurrent deliveries
//! serialize on the status re-check.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;
use veridex_shared::{
    AttemptStatus, BillingTerm, InvoiceStatus, PaymentProvider, PlanType, SubscriptionStatus,
    TrialStatus,
};

use crate::error::{BillingError, BillingResult};

use super::{
    BillingAccount, BillingStore, FailOutcome, Invoice, InvoicePurpose, NewSubscription,
    PaymentAttempt, SettleOutcome, Subscription, TrialSession,
};

/// `BillingStore` backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    organization_id: Uuid,
    billing_email: Option<String>,
    billing_name: Option<String>,
    last_gateway: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl AccountRow {
    fn into_account(self) -> BillingResult<BillingAccount> {
        let last_gateway = self
            .last_gateway
            .map(|g| {
                PaymentProvider::from_str(&g)
                    .ok_or_else(|| BillingError::Database(format!("unknown gateway '{g}'")))
            })
            .transpose()?;
        Ok(BillingAccount {
            id: self.id,
            organization_id: self.organization_id,
            billing_email: self.billing_email,
            billing_name: self.billing_name,
            last_gateway,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    billing_account_id: Uuid,
    amount_cents: i64,
    currency: String,
    status: String,
    purpose: serde_json::Value,
    integrity_hash: String,
    redirect_url: Option<String>,
    provider_session_id: Option<String>,
    refund_flagged: bool,
    created_at: OffsetDateTime,
    paid_at: Option<OffsetDateTime>,
    voided_at: Option<OffsetDateTime>,
}

impl InvoiceRow {
    fn into_invoice(self) -> BillingResult<Invoice> {
        let status = InvoiceStatus::from_str(&self.status)
            .ok_or_else(|| BillingError::Database(format!("unknown invoice status '{}'", self.status)))?;
        let purpose: InvoicePurpose = serde_json::from_value(self.purpose).map_err(|e| {
            BillingError::Database(format!("invoice {} purpose decode failed: {e}", self.id))
        })?;
        Ok(Invoice {
            id: self.id,
            billing_account_id: self.billing_account_id,
            amount_cents: self.amount_cents,
            currency: self.currency,
            status,
            purpose,
            integrity_hash: self.integrity_hash,
            redirect_url: self.redirect_url,
            provider_session_id: self.provider_session_id,
            refund_flagged: self.refund_flagged,
            created_at: self.created_at,
            paid_at: self.paid_at,
            voided_at: self.voided_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    invoice_id: Uuid,
    billing_account_id: Uuid,
    amount_cents: i64,
    currency: String,
    status: String,
    gateway: String,
    gateway_payment_id: Option<String>,
    idempotency_key: Option<String>,
    request_hash: Option<String>,
    error_message: Option<String>,
    created_at: OffsetDateTime,
    settled_at: Option<OffsetDateTime>,
}

impl AttemptRow {
    fn into_attempt(self) -> BillingResult<PaymentAttempt> {
        let status = AttemptStatus::from_str(&self.status)
            .ok_or_else(|| BillingError::Database(format!("unknown attempt status '{}'", self.status)))?;
        let gateway = PaymentProvider::from_str(&self.gateway)
            .ok_or_else(|| BillingError::Database(format!("unknown gateway '{}'", self.gateway)))?;
        Ok(PaymentAttempt {
            id: self.id,
            invoice_id: self.invoice_id,
            billing_account_id: self.billing_account_id,
            amount_cents: self.amount_cents,
            currency: self.currency,
            status,
            gateway,
            gateway_payment_id: self.gateway_payment_id,
            idempotency_key: self.idempotency_key,
            request_hash: self.request_hash,
            error_message: self.error_message,
            created_at: self.created_at,
            settled_at: self.settled_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    billing_account_id: Uuid,
    invoice_id: Option<Uuid>,
    plan: String,
    status: String,
    amount_cents: i64,
    currency: String,
    term: String,
    duration_days: i64,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
    canceled_at: Option<OffsetDateTime>,
}

impl SubscriptionRow {
    fn into_subscription(self) -> BillingResult<Subscription> {
        let plan = PlanType::from_str(&self.plan)
            .ok_or_else(|| BillingError::Database(format!("unknown plan '{}'", self.plan)))?;
        let status = SubscriptionStatus::from_str(&self.status).ok_or_else(|| {
            BillingError::Database(format!("unknown subscription status '{}'", self.status))
        })?;
        let term = BillingTerm::from_str(&self.term)
            .ok_or_else(|| BillingError::Database(format!("unknown billing term '{}'", self.term)))?;
        Ok(Subscription {
            id: self.id,
            billing_account_id: self.billing_account_id,
            invoice_id: self.invoice_id,
            plan,
            status,
            amount_cents: self.amount_cents,
            currency: self.currency,
            term,
            duration_days: self.duration_days,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            canceled_at: self.canceled_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrialRow {
    id: Uuid,
    billing_account_id: Uuid,
    plan: String,
    status: String,
    started_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    converted_at: Option<OffsetDateTime>,
}

impl TrialRow {
    fn into_trial(self) -> BillingResult<TrialSession> {
        let plan = PlanType::from_str(&self.plan)
            .ok_or_else(|| BillingError::Database(format!("unknown plan '{}'", self.plan)))?;
        let status = TrialStatus::from_str(&self.status)
            .ok_or_else(|| BillingError::Database(format!("unknown trial status '{}'", self.status)))?;
        Ok(TrialSession {
            id: self.id,
            billing_account_id: self.billing_account_id,
            plan,
            status,
            started_at: self.started_at,
            expires_at: self.expires_at,
            converted_at: self.converted_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, organization_id, billing_email, billing_name, last_gateway, created_at, updated_at";
const INVOICE_COLUMNS: &str = "id, billing_account_id, amount_cents, currency, status, purpose, \
     integrity_hash, redirect_url, provider_session_id, refund_flagged, created_at, paid_at, voided_at";
const ATTEMPT_COLUMNS: &str = "id, invoice_id, billing_account_id, amount_cents, currency, status, \
     gateway, gateway_payment_id, idempotency_key, request_hash, error_message, created_at, settled_at";
const SUBSCRIPTION_COLUMNS: &str = "id, billing_account_id, invoice_id, plan, status, amount_cents, \
     currency, term, duration_days, current_period_start, current_period_end, canceled_at";

fn purpose_json(purpose: &InvoicePurpose) -> BillingResult<serde_json::Value> {
    serde_json::to_value(purpose)
        .map_err(|e| BillingError::Internal(format!("purpose encode failed: {e}")))
}

#[async_trait::async_trait]
impl BillingStore for PgStore {
    async fn find_account_by_org(
        &self,
        organization_id: Uuid,
    ) -> BillingResult<Option<BillingAccount>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM billing_accounts WHERE organization_id = $1"
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRow::into_account).transpose()
    }

    async fn get_account(&self, id: Uuid) -> BillingResult<Option<BillingAccount>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM billing_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountRow::into_account).transpose()
    }

    async fn insert_account(&self, account: &BillingAccount) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_accounts
                (id, organization_id, billing_email, billing_name, last_gateway, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(account.organization_id)
        .bind(&account.billing_email)
        .bind(&account.billing_name)
        .bind(account.last_gateway.map(|g| g.as_str()))
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_account_contact(
        &self,
        id: Uuid,
        billing_email: Option<&str>,
        billing_name: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE billing_accounts
            SET billing_email = COALESCE($2, billing_email),
                billing_name = COALESCE($3, billing_name),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(billing_email)
        .bind(billing_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_account_gateway(&self, id: Uuid, gateway: PaymentProvider) -> BillingResult<()> {
        sqlx::query(
            "UPDATE billing_accounts SET last_gateway = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(gateway.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_checkout_pair(
        &self,
        invoice: &Invoice,
        attempt: &PaymentAttempt,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO invoices
                (id, billing_account_id, amount_cents, currency, status, purpose, integrity_hash,
                 redirect_url, provider_session_id, refund_flagged, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.billing_account_id)
        .bind(invoice.amount_cents)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(purpose_json(&invoice.purpose)?)
        .bind(&invoice.integrity_hash)
        .bind(&invoice.redirect_url)
        .bind(&invoice.provider_session_id)
        .bind(invoice.refund_flagged)
        .bind(invoice.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payment_attempts
                (id, invoice_id, billing_account_id, amount_cents, currency, status, gateway,
                 gateway_payment_id, idempotency_key, request_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.invoice_id)
        .bind(attempt.billing_account_id)
        .bind(attempt.amount_cents)
        .bind(&attempt.currency)
        .bind(attempt.status.as_str())
        .bind(attempt.gateway.as_str())
        .bind(&attempt.gateway_payment_id)
        .bind(&attempt.idempotency_key)
        .bind(&attempt.request_hash)
        .bind(attempt.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> =
            sqlx::query_as(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(InvoiceRow::into_invoice).transpose()
    }

    async fn set_invoice_checkout_artifacts(
        &self,
        invoice_id: Uuid,
        redirect_url: Option<&str>,
        provider_session_id: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET redirect_url = COALESCE($2, redirect_url),
                provider_session_id = COALESCE($3, provider_session_id)
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(redirect_url)
        .bind(provider_session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_invoice_refund_flag(&self, invoice_id: Uuid, flagged: bool) -> BillingResult<()> {
        sqlx::query("UPDATE invoices SET refund_flagged = $2 WHERE id = $1")
            .bind(invoice_id)
            .bind(flagged)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> BillingResult<Option<PaymentAttempt>> {
        let row: Option<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttemptRow::into_attempt).transpose()
    }

    async fn find_attempt_by_idempotency_key(
        &self,
        billing_account_id: Uuid,
        key: &str,
    ) -> BillingResult<Option<PaymentAttempt>> {
        let row: Option<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts \
             WHERE billing_account_id = $1 AND idempotency_key = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(billing_account_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttemptRow::into_attempt).transpose()
    }

    async fn set_attempt_gateway_reference(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE payment_attempts SET gateway_payment_id = $2 WHERE id = $1")
            .bind(attempt_id)
            .bind(gateway_payment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn settle_attempt_success(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
        subscription: NewSubscription,
    ) -> BillingResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = OffsetDateTime::now_utc();

        // Lock the attempt row; concurrent settlements serialize here.
        let row: Option<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE id = $1 FOR UPDATE"
        ))
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;
        let attempt = row
            .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?
            .into_attempt()?;

        if attempt.status.is_terminal() {
            let subscription_id = if attempt.status == AttemptStatus::Success {
                let sub: Option<(Uuid,)> =
                    sqlx::query_as("SELECT id FROM subscriptions WHERE invoice_id = $1")
                        .bind(attempt.invoice_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                sub.map(|(id,)| id)
            } else {
                None
            };
            tx.commit().await?;
            return Ok(SettleOutcome::AlreadyTerminal {
                attempt,
                subscription_id,
            });
        }

        let updated_attempt: AttemptRow = sqlx::query_as(&format!(
            "UPDATE payment_attempts \
             SET status = 'success', gateway_payment_id = $2, settled_at = $3 \
             WHERE id = $1 RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(attempt_id)
        .bind(gateway_payment_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let updated_invoice: InvoiceRow = sqlx::query_as(&format!(
            "UPDATE invoices SET status = 'paid', paid_at = $2 \
             WHERE id = $1 RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(attempt.invoice_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        // Single-active invariant: displace the prior ACTIVE row in the same
        // transaction as the new one.
        let displaced: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', canceled_at = $2
            WHERE billing_account_id = $1 AND status = 'active'
            RETURNING id
            "#,
        )
        .bind(subscription.billing_account_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let sub_row = subscription.into_subscription(attempt.invoice_id, now);
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, billing_account_id, invoice_id, plan, status, amount_cents, currency, term,
                 duration_days, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(sub_row.id)
        .bind(sub_row.billing_account_id)
        .bind(sub_row.invoice_id)
        .bind(sub_row.plan.as_str())
        .bind(sub_row.status.as_str())
        .bind(sub_row.amount_cents)
        .bind(&sub_row.currency)
        .bind(sub_row.term.as_str())
        .bind(sub_row.duration_days)
        .bind(sub_row.current_period_start)
        .bind(sub_row.current_period_end)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SettleOutcome::Settled {
            attempt: updated_attempt.into_attempt()?,
            invoice: updated_invoice.into_invoice()?,
            subscription: sub_row,
            displaced_subscription_id: displaced.map(|(id,)| id),
        })
    }

    async fn fail_attempt(
        &self,
        attempt_id: Uuid,
        terminal: AttemptStatus,
        error_message: &str,
    ) -> BillingResult<FailOutcome> {
        if !matches!(terminal, AttemptStatus::Failed | AttemptStatus::Canceled) {
            return Err(BillingError::Internal(format!(
                "fail_attempt requires a failure status, got {terminal}"
            )));
        }
        let mut tx = self.pool.begin().await?;
        let now = OffsetDateTime::now_utc();

        let row: Option<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE id = $1 FOR UPDATE"
        ))
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;
        let attempt = row
            .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?
            .into_attempt()?;

        if attempt.status.is_terminal() {
            tx.commit().await?;
            return Ok(FailOutcome::AlreadyTerminal { attempt });
        }

        let updated_attempt: AttemptRow = sqlx::query_as(&format!(
            "UPDATE payment_attempts \
             SET status = $2, error_message = $3, settled_at = $4 \
             WHERE id = $1 RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(attempt_id)
        .bind(terminal.as_str())
        .bind(error_message)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let voided = sqlx::query(
            "UPDATE invoices SET status = 'void', voided_at = $2 WHERE id = $1 AND status = 'open'",
        )
        .bind(attempt.invoice_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(FailOutcome::Applied {
            attempt: updated_attempt.into_attempt()?,
            invoice_voided: voided.rows_affected() > 0,
        })
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn find_active_subscription(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE billing_account_id = $1 AND status = 'active' \
             ORDER BY current_period_start DESC LIMIT 1"
        ))
        .bind(billing_account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn find_subscription_by_invoice(
        &self,
        invoice_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubscriptionRow::into_subscription).transpose()
    }

    async fn cancel_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "UPDATE subscriptions SET status = 'canceled', canceled_at = NOW() \
             WHERE id = $1 AND status = 'active' RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Some(r.into_subscription()?)),
            // Not active (or missing): return current state unchanged
            None => self.get_subscription(id).await,
        }
    }

    async fn find_trial(&self, billing_account_id: Uuid) -> BillingResult<Option<TrialSession>> {
        let row: Option<TrialRow> = sqlx::query_as(
            "SELECT id, billing_account_id, plan, status, started_at, expires_at, converted_at \
             FROM trial_sessions WHERE billing_account_id = $1 \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(billing_account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrialRow::into_trial).transpose()
    }

    async fn insert_trial(&self, trial: &TrialSession) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trial_sessions
                (id, billing_account_id, plan, status, started_at, expires_at, converted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(trial.id)
        .bind(trial.billing_account_id)
        .bind(trial.plan.as_str())
        .bind(trial.status.as_str())
        .bind(trial.started_at)
        .bind(trial.expires_at)
        .bind(trial.converted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_trial(&self, trial: &TrialSession) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE trial_sessions
            SET status = $2, expires_at = $3, converted_at = $4
            WHERE id = $1
            "#,
        )
        .bind(trial.id)
        .bind(trial.status.as_str())
        .bind(trial.expires_at)
        .bind(trial.converted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
