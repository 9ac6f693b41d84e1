//! Billing Invariants Module
//!
//! Runnable consistency checks for the billing system. These can be run
//! after any settlement or webhook replay to confirm the stored state is
//! valid.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Billing account(s) affected
    pub billing_account_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - customers may be charged or provisioned incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    billing_account_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AmountDriftRow {
    attempt_id: Uuid,
    billing_account_id: Uuid,
    attempt_amount: i64,
    invoice_amount: i64,
    attempt_currency: String,
    invoice_currency: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidWithoutTimestampRow {
    invoice_id: Uuid,
    billing_account_id: Uuid,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SuccessWithoutReferenceRow {
    attempt_id: Uuid,
    billing_account_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct SettledWithoutSubscriptionRow {
    invoice_id: Uuid,
    billing_account_id: Uuid,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_attempt_invoice_amounts().await?);
        violations.extend(self.check_paid_invoices_have_timestamp().await?);
        violations.extend(self.check_success_attempts_have_reference().await?);
        violations.extend(self.check_paid_invoices_have_subscription().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 active subscription per billing account
    ///
    /// Multiple active subscriptions would double-provision and
    /// double-charge.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT billing_account_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status = 'active'
            GROUP BY billing_account_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                billing_account_ids: vec![row.billing_account_id],
                description: format!(
                    "Billing account has {} active subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Pending attempts mirror their invoice's amount/currency
    ///
    /// Drift here means settlement validation will hard-fail the attempt.
    async fn check_attempt_invoice_amounts(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<AmountDriftRow> = sqlx::query_as(
            r#"
            SELECT
                a.id as attempt_id,
                a.billing_account_id,
                a.amount_cents as attempt_amount,
                i.amount_cents as invoice_amount,
                a.currency as attempt_currency,
                i.currency as invoice_currency
            FROM payment_attempts a
            JOIN invoices i ON i.id = a.invoice_id
            WHERE a.status = 'pending'
              AND (a.amount_cents != i.amount_cents OR a.currency != i.currency)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "attempt_invoice_amounts_match".to_string(),
                billing_account_ids: vec![row.billing_account_id],
                description: format!(
                    "Pending attempt has {} {} but its invoice has {} {}",
                    row.attempt_amount,
                    row.attempt_currency,
                    row.invoice_amount,
                    row.invoice_currency
                ),
                context: serde_json::json!({
                    "attempt_id": row.attempt_id,
                    "attempt_amount": row.attempt_amount,
                    "invoice_amount": row.invoice_amount,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: PAID invoices carry a paid timestamp
    async fn check_paid_invoices_have_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidWithoutTimestampRow> = sqlx::query_as(
            r#"
            SELECT id as invoice_id, billing_account_id, status
            FROM invoices
            WHERE status = 'paid' AND paid_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_invoices_have_timestamp".to_string(),
                billing_account_ids: vec![row.billing_account_id],
                description: "PAID invoice has no paid_at timestamp".to_string(),
                context: serde_json::json!({
                    "invoice_id": row.invoice_id,
                    "status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: SUCCESS attempts carry a provider payment reference
    async fn check_success_attempts_have_reference(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SuccessWithoutReferenceRow> = sqlx::query_as(
            r#"
            SELECT id as attempt_id, billing_account_id
            FROM payment_attempts
            WHERE status = 'success'
              AND (gateway_payment_id IS NULL OR gateway_payment_id = '')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "success_attempts_have_reference".to_string(),
                billing_account_ids: vec![row.billing_account_id],
                description: "SUCCESS attempt has no provider payment id".to_string(),
                context: serde_json::json!({
                    "attempt_id": row.attempt_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: PAID invoices produced a subscription
    ///
    /// A paid-but-unprovisioned customer is the failure mode settlement
    /// exists to prevent.
    async fn check_paid_invoices_have_subscription(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SettledWithoutSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT i.id as invoice_id, i.billing_account_id
            FROM invoices i
            WHERE i.status = 'paid'
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s WHERE s.invoice_id = i.id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_invoices_have_subscription".to_string(),
                billing_account_ids: vec![row.billing_account_id],
                description: "PAID invoice has no subscription row".to_string(),
                context: serde_json::json!({
                    "invoice_id": row.invoice_id,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "attempt_invoice_amounts_match" => self.check_attempt_invoice_amounts().await,
            "paid_invoices_have_timestamp" => self.check_paid_invoices_have_timestamp().await,
            "success_attempts_have_reference" => {
                self.check_success_attempts_have_reference().await
            }
            "paid_invoices_have_subscription" => {
                self.check_paid_invoices_have_subscription().await
            }
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_active_subscription",
            "attempt_invoice_amounts_match",
            "paid_invoices_have_timestamp",
            "success_attempts_have_reference",
            "paid_invoices_have_subscription",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 5);
        assert!(checks.contains(&"single_active_subscription"));
        assert!(checks.contains(&"attempt_invoice_amounts_match"));
    }
}
