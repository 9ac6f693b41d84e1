//! Admin billing operations
//!
//! Each operation wraps a core billing mutation and appends an audit entry.
//! Audit writes are fire-and-forget: a logging failure is reported in the
//! process log but never rolls back the mutation it describes.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;
use veridex_shared::{BillingTerm, PlanType};

use crate::account::AccountResolver;
use crate::checkout::{CheckoutOutcome, CheckoutService};
use crate::error::{BillingError, BillingResult};
use crate::external::{AuditEntry, AuditLog};
use crate::lifecycle::LifecycleManager;
use crate::settlement::{SettlementEngine, SettlementResult};
use crate::store::{BillingStore, Subscription, TrialSession};
use crate::trial::TrialService;

pub struct AdminBillingService {
    store: Arc<dyn BillingStore>,
    checkout: Arc<CheckoutService>,
    engine: SettlementEngine,
    lifecycle: LifecycleManager,
    trials: TrialService,
    accounts: AccountResolver,
    audit: Arc<dyn AuditLog>,
}

impl AdminBillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        checkout: Arc<CheckoutService>,
        engine: SettlementEngine,
        lifecycle: LifecycleManager,
        trials: TrialService,
        accounts: AccountResolver,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            checkout,
            engine,
            lifecycle,
            trials,
            accounts,
            audit,
        }
    }

    /// Create a manual invoice (no gateway initiation; payment is applied
    /// offline later).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_manual_invoice(
        &self,
        actor_id: Uuid,
        organization_id: Uuid,
        plan: PlanType,
        term: Option<BillingTerm>,
        duration_days: Option<i64>,
        amount_cents: Option<i64>,
        note: Option<String>,
    ) -> BillingResult<CheckoutOutcome> {
        let outcome = self
            .checkout
            .create_manual_invoice(
                organization_id,
                plan,
                term,
                duration_days,
                amount_cents,
                actor_id,
                note.clone(),
            )
            .await?;

        self.append_audit(AuditEntry {
            actor_id,
            action: "billing.manual_invoice".to_string(),
            entity: "invoice".to_string(),
            target_id: outcome.invoice.id,
            details: format!(
                "manual invoice for organization {organization_id}: {} {} ({})",
                outcome.invoice.amount_cents, outcome.invoice.currency, plan
            ),
            snapshot: json!({
                "invoice_id": outcome.invoice.id,
                "attempt_id": outcome.attempt.id,
                "amount_cents": outcome.invoice.amount_cents,
                "currency": outcome.invoice.currency,
                "plan": plan.as_str(),
                "note": note,
            }),
        })
        .await;

        Ok(outcome)
    }

    /// Apply an offline payment (bank transfer, cheque) against a pending
    /// attempt. Runs the full settlement path, including integrity checks.
    pub async fn apply_offline_payment(
        &self,
        actor_id: Uuid,
        attempt_id: Uuid,
        reference: Option<String>,
    ) -> BillingResult<SettlementResult> {
        let reference = reference.unwrap_or_else(|| format!("offline_{}", attempt_id.simple()));
        let result = self
            .engine
            .activate_success(attempt_id, &reference, None)
            .await?;

        self.append_audit(AuditEntry {
            actor_id,
            action: "billing.offline_payment".to_string(),
            entity: "payment_attempt".to_string(),
            target_id: attempt_id,
            details: format!("offline payment applied with reference {reference}"),
            snapshot: json!({
                "attempt_id": attempt_id,
                "reference": reference,
                "subscription_id": result.subscription_id,
                "idempotent": result.idempotent,
            }),
        })
        .await;

        Ok(result)
    }

    /// Cancel the organization's active subscription.
    pub async fn cancel_subscription(
        &self,
        actor_id: Uuid,
        organization_id: Uuid,
        reason: Option<String>,
    ) -> BillingResult<Option<Subscription>> {
        let (account, _) = self.accounts.resolve(organization_id).await?;
        let canceled = self.lifecycle.cancel_active(account.id).await?;

        if let Some(sub) = &canceled {
            self.append_audit(AuditEntry {
                actor_id,
                action: "billing.subscription_cancel".to_string(),
                entity: "subscription".to_string(),
                target_id: sub.id,
                details: format!(
                    "canceled subscription for organization {organization_id}: {}",
                    reason.as_deref().unwrap_or("no reason given")
                ),
                snapshot: json!({
                    "subscription_id": sub.id,
                    "plan": sub.plan.as_str(),
                    "reason": reason,
                }),
            })
            .await;
        }

        Ok(canceled)
    }

    /// Flag (or clear the flag on) an invoice for refund review.
    pub async fn flag_refund(
        &self,
        actor_id: Uuid,
        invoice_id: Uuid,
        flagged: bool,
        reason: Option<String>,
    ) -> BillingResult<()> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;
        self.store.set_invoice_refund_flag(invoice.id, flagged).await?;

        self.append_audit(AuditEntry {
            actor_id,
            action: "billing.refund_flag".to_string(),
            entity: "invoice".to_string(),
            target_id: invoice_id,
            details: format!(
                "{} refund flag: {}",
                if flagged { "set" } else { "cleared" },
                reason.as_deref().unwrap_or("no reason given")
            ),
            snapshot: json!({
                "invoice_id": invoice_id,
                "flagged": flagged,
                "invoice_status": invoice.status.as_str(),
                "reason": reason,
            }),
        })
        .await;

        Ok(())
    }

    /// Extend the organization's active trial.
    pub async fn extend_trial(
        &self,
        actor_id: Uuid,
        organization_id: Uuid,
        extra_days: i64,
    ) -> BillingResult<TrialSession> {
        let (account, _) = self.accounts.resolve(organization_id).await?;
        let trial = self.trials.extend_trial(account.id, extra_days).await?;

        self.append_audit(AuditEntry {
            actor_id,
            action: "billing.trial_extend".to_string(),
            entity: "trial_session".to_string(),
            target_id: trial.id,
            details: format!("extended trial by {extra_days} days"),
            snapshot: json!({
                "trial_id": trial.id,
                "extra_days": extra_days,
                "expires_at": trial.expires_at.to_string(),
            }),
        })
        .await;

        Ok(trial)
    }

    async fn append_audit(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.audit.log_action(entry).await {
            tracing::warn!(
                action = %action,
                error = %e,
                "Audit append failed - billing mutation is already committed"
            );
        }
    }
}
