//! Settlement
//!
//! The state machine that resolves payment attempts. Every entry point
//! re-reads the attempt inside the store's atomic transition before
//! mutating, so duplicate and out-of-order provider deliveries collapse to
//! idempotent no-ops: first successful settlement wins.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;
use veridex_shared::{AttemptStatus, PlanType};

use crate::error::{BillingError, BillingResult};
use crate::integrity::IntegrityGuard;
use crate::lifecycle::LifecycleManager;
use crate::store::{
    BillingStore, FailOutcome, Invoice, NewSubscription, PaymentAttempt, SettleOutcome,
};
use crate::trial::TrialService;

/// The provider's own record of the charge, when the callback carries one.
/// Disagreement with the attempt is a hard rejection: a provider must not
/// confirm a different charge than was requested.
#[derive(Debug, Clone, Default)]
pub struct ProviderCharge {
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Outcome of a settlement entry point.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub attempt_id: Uuid,
    pub invoice_id: Uuid,
    pub attempt_status: AttemptStatus,
    pub subscription_id: Option<Uuid>,
    /// The attempt was already terminal when this call arrived
    pub idempotent: bool,
    /// Duplicate delivery of a success the engine had already applied
    pub replayed: bool,
}

impl SettlementResult {
    fn from_attempt(attempt: &PaymentAttempt, subscription_id: Option<Uuid>) -> Self {
        Self {
            attempt_id: attempt.id,
            invoice_id: attempt.invoice_id,
            attempt_status: attempt.status,
            subscription_id,
            idempotent: false,
            replayed: false,
        }
    }

    fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    fn replayed(mut self) -> Self {
        self.replayed = true;
        self
    }
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn BillingStore>,
    guard: IntegrityGuard,
    lifecycle: LifecycleManager,
    trials: TrialService,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        guard: IntegrityGuard,
        lifecycle: LifecycleManager,
        trials: TrialService,
    ) -> Self {
        Self {
            store,
            guard,
            lifecycle,
            trials,
        }
    }

    /// Resolve an attempt as FAILED or CANCELED and void its invoice.
    ///
    /// Idempotent: an already-terminal attempt (including SUCCESS) is
    /// returned unchanged.
    pub async fn mark_failed(
        &self,
        attempt_id: Uuid,
        terminal: AttemptStatus,
        reason: &str,
    ) -> BillingResult<SettlementResult> {
        match self.store.fail_attempt(attempt_id, terminal, reason).await? {
            FailOutcome::Applied {
                attempt,
                invoice_voided,
            } => {
                tracing::info!(
                    attempt_id = %attempt.id,
                    invoice_id = %attempt.invoice_id,
                    status = %attempt.status,
                    invoice_voided = invoice_voided,
                    reason = %reason,
                    "Payment attempt resolved as failure"
                );
                Ok(SettlementResult::from_attempt(&attempt, None))
            }
            FailOutcome::AlreadyTerminal { attempt } => {
                let subscription_id = if attempt.status == AttemptStatus::Success {
                    self.store
                        .find_subscription_by_invoice(attempt.invoice_id)
                        .await?
                        .map(|s| s.id)
                } else {
                    None
                };
                tracing::debug!(
                    attempt_id = %attempt.id,
                    status = %attempt.status,
                    "mark_failed on already-resolved attempt - no-op"
                );
                Ok(SettlementResult::from_attempt(&attempt, subscription_id).idempotent())
            }
        }
    }

    /// Resolve an attempt as SUCCESS: validate, then atomically transition
    /// attempt -> invoice -> subscription, then propagate consequences.
    ///
    /// `provider_charge` is the provider's own record of what was collected;
    /// when present it must match the attempt exactly.
    pub async fn activate_success(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
        provider_charge: Option<ProviderCharge>,
    ) -> BillingResult<SettlementResult> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?;

        // Duplicate webhook delivery of a success we already applied
        if attempt.status == AttemptStatus::Success {
            let subscription_id = self
                .store
                .find_subscription_by_invoice(attempt.invoice_id)
                .await?
                .map(|s| s.id);
            tracing::info!(
                attempt_id = %attempt.id,
                "Duplicate success delivery - replaying prior settlement"
            );
            return Ok(SettlementResult::from_attempt(&attempt, subscription_id)
                .idempotent()
                .replayed());
        }
        // Already resolved by a prior callback (failed/canceled)
        if attempt.status.is_terminal() {
            tracing::debug!(
                attempt_id = %attempt.id,
                status = %attempt.status,
                "Success delivery for already-resolved attempt - no-op"
            );
            return Ok(SettlementResult::from_attempt(&attempt, None).idempotent());
        }

        let invoice = self
            .store
            .get_invoice(attempt.invoice_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("invoice {} for attempt", attempt.invoice_id))
            })?;

        // Internal consistency: the attempt must still mirror its invoice.
        // Drift here is fatal for the attempt, never retried.
        if attempt.amount_cents != invoice.amount_cents
            || !attempt.currency.eq_ignore_ascii_case(&invoice.currency)
        {
            tracing::error!(
                attempt_id = %attempt.id,
                invoice_id = %invoice.id,
                attempt_amount = attempt.amount_cents,
                invoice_amount = invoice.amount_cents,
                attempt_currency = %attempt.currency,
                invoice_currency = %invoice.currency,
                "Attempt/invoice amount drift"
            );
            self.mark_failed(
                attempt.id,
                AttemptStatus::Failed,
                "attempt/invoice amount validation failed",
            )
            .await?;
            return Err(BillingError::AmountValidationFailed(attempt.id));
        }

        // Provider cross-check: the charge the provider confirms must be the
        // charge we requested. Leaves the attempt PENDING.
        if let Some(charge) = &provider_charge {
            if let Some(reported) = charge.amount_cents {
                if reported != attempt.amount_cents {
                    tracing::error!(
                        attempt_id = %attempt.id,
                        expected = attempt.amount_cents,
                        reported = reported,
                        "Provider confirmed a different amount than requested"
                    );
                    return Err(BillingError::ProviderAmountMismatch {
                        expected: attempt.amount_cents,
                        reported,
                    });
                }
            }
            if let Some(reported) = charge.currency.as_deref() {
                if !reported.eq_ignore_ascii_case(&attempt.currency) {
                    return Err(BillingError::ProviderCurrencyMismatch {
                        expected: attempt.currency.clone(),
                        reported: reported.to_string(),
                    });
                }
            }
        }

        // Tamper check on the stored invoice; failure voids it.
        if let Err(e) = self.guard.validate_invoice(&invoice) {
            self.mark_failed(attempt.id, AttemptStatus::Failed, &e.to_string())
                .await?;
            return Err(e);
        }

        // Plan provenance: an invoice must never settle without a payable
        // plan recorded in its metadata.
        let plan = invoice.purpose.plan();
        if plan == PlanType::Free {
            self.mark_failed(
                attempt.id,
                AttemptStatus::Failed,
                "invoice has no payable plan in its metadata",
            )
            .await?;
            return Err(BillingError::PlanTypeMissing(invoice.id));
        }

        let new_subscription = NewSubscription {
            billing_account_id: invoice.billing_account_id,
            plan,
            amount_cents: invoice.amount_cents,
            currency: invoice.currency.clone(),
            term: invoice.purpose.term(),
            duration_days: invoice.purpose.duration_days(),
        };

        match self
            .store
            .settle_attempt_success(attempt.id, gateway_payment_id, new_subscription)
            .await?
        {
            SettleOutcome::Settled {
                attempt,
                invoice,
                subscription,
                displaced_subscription_id,
            } => {
                tracing::info!(
                    attempt_id = %attempt.id,
                    invoice_id = %invoice.id,
                    subscription_id = %subscription.id,
                    displaced_subscription_id = ?displaced_subscription_id,
                    plan = %subscription.plan,
                    amount_cents = subscription.amount_cents,
                    "Payment settled - subscription activated"
                );
                self.propagate_settlement(&attempt, &invoice).await;
                Ok(SettlementResult::from_attempt(&attempt, Some(subscription.id)))
            }
            // A concurrent delivery won the transaction between our status
            // read and the store transition.
            SettleOutcome::AlreadyTerminal {
                attempt,
                subscription_id,
            } => {
                tracing::info!(
                    attempt_id = %attempt.id,
                    status = %attempt.status,
                    "Concurrent settlement won - returning prior outcome"
                );
                let result = SettlementResult::from_attempt(&attempt, subscription_id).idempotent();
                if attempt.status == AttemptStatus::Success {
                    Ok(result.replayed())
                } else {
                    Ok(result)
                }
            }
        }
    }

    /// Post-commit propagation: trial conversion, account gateway marker,
    /// and the organization plan push. Failures are logged with full context
    /// but never unwind the committed settlement.
    async fn propagate_settlement(&self, attempt: &PaymentAttempt, invoice: &Invoice) {
        let account_id = invoice.billing_account_id;

        if let Err(e) = self.trials.convert_active_trial(account_id).await {
            tracing::error!(
                billing_account_id = %account_id,
                error = %e,
                "Failed to convert trial after settlement - manual review required"
            );
        }

        if let Err(e) = self.store.set_account_gateway(account_id, attempt.gateway).await {
            tracing::error!(
                billing_account_id = %account_id,
                error = %e,
                "Failed to update account gateway marker after settlement"
            );
        }

        let organization_id = invoice.purpose.organization_id();
        match self.store.find_subscription_by_invoice(invoice.id).await {
            Ok(Some(subscription)) => {
                if let Err(e) = self
                    .lifecycle
                    .propagate_plan(organization_id, &subscription)
                    .await
                {
                    tracing::error!(
                        organization_id = %organization_id,
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to push plan into organization record - manual review required"
                    );
                }
            }
            Ok(None) => {
                tracing::error!(
                    invoice_id = %invoice.id,
                    "Settled invoice has no subscription row"
                );
            }
            Err(e) => {
                tracing::error!(
                    invoice_id = %invoice.id,
                    error = %e,
                    "Failed to load settled subscription for propagation"
                );
            }
        }
    }
}
