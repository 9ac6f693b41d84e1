//! In-memory store
//!
//! Backs tests and the mock provider path. Every operation takes the single
//! state lock, so the multi-row settlement transitions are atomic in-process
//! exactly like the Postgres transactions they stand in for.

use std::collections::HashMap;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;
use veridex_shared::{AttemptStatus, InvoiceStatus, PaymentProvider, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};

use super::{
    BillingAccount, BillingStore, FailOutcome, Invoice, NewSubscription, PaymentAttempt,
    SettleOutcome, Subscription, TrialSession,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, BillingAccount>,
    invoices: HashMap<Uuid, Invoice>,
    attempts: HashMap<Uuid, PaymentAttempt>,
    subscriptions: HashMap<Uuid, Subscription>,
    trials: HashMap<Uuid, TrialSession>,
}

/// Mutex-guarded in-memory `BillingStore`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BillingStore for MemoryStore {
    async fn find_account_by_org(
        &self,
        organization_id: Uuid,
    ) -> BillingResult<Option<BillingAccount>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.organization_id == organization_id)
            .cloned())
    }

    async fn get_account(&self, id: Uuid) -> BillingResult<Option<BillingAccount>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn insert_account(&self, account: &BillingAccount) -> BillingResult<()> {
        self.state
            .lock()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn update_account_contact(
        &self,
        id: Uuid,
        billing_email: Option<&str>,
        billing_name: Option<&str>,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(format!("billing account {id}")))?;
        if let Some(email) = billing_email {
            account.billing_email = Some(email.to_string());
        }
        if let Some(name) = billing_name {
            account.billing_name = Some(name.to_string());
        }
        account.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn set_account_gateway(&self, id: Uuid, gateway: PaymentProvider) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(format!("billing account {id}")))?;
        account.last_gateway = Some(gateway);
        account.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn insert_checkout_pair(
        &self,
        invoice: &Invoice,
        attempt: &PaymentAttempt,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.invoices.insert(invoice.id, invoice.clone());
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn set_invoice_checkout_artifacts(
        &self,
        invoice_id: Uuid,
        redirect_url: Option<&str>,
        provider_session_id: Option<&str>,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;
        if let Some(url) = redirect_url {
            invoice.redirect_url = Some(url.to_string());
        }
        if let Some(session) = provider_session_id {
            invoice.provider_session_id = Some(session.to_string());
        }
        Ok(())
    }

    async fn set_invoice_refund_flag(&self, invoice_id: Uuid, flagged: bool) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;
        invoice.refund_flagged = flagged;
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> BillingResult<Option<PaymentAttempt>> {
        Ok(self.state.lock().await.attempts.get(&id).cloned())
    }

    async fn find_attempt_by_idempotency_key(
        &self,
        billing_account_id: Uuid,
        key: &str,
    ) -> BillingResult<Option<PaymentAttempt>> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .values()
            .find(|a| {
                a.billing_account_id == billing_account_id
                    && a.idempotency_key.as_deref() == Some(key)
            })
            .cloned())
    }

    async fn set_attempt_gateway_reference(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?;
        attempt.gateway_payment_id = Some(gateway_payment_id.to_string());
        Ok(())
    }

    async fn settle_attempt_success(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
        subscription: NewSubscription,
    ) -> BillingResult<SettleOutcome> {
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();

        let attempt = state
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?;

        if attempt.status.is_terminal() {
            let subscription_id = if attempt.status == AttemptStatus::Success {
                state
                    .subscriptions
                    .values()
                    .find(|s| s.invoice_id == Some(attempt.invoice_id))
                    .map(|s| s.id)
            } else {
                None
            };
            return Ok(SettleOutcome::AlreadyTerminal {
                attempt,
                subscription_id,
            });
        }

        // Attempt is PENDING and we hold the lock: apply the full transition.
        let invoice_id = attempt.invoice_id;
        let displaced_subscription_id = state
            .subscriptions
            .values()
            .find(|s| {
                s.billing_account_id == subscription.billing_account_id
                    && s.status == SubscriptionStatus::Active
            })
            .map(|s| s.id);
        if let Some(prior_id) = displaced_subscription_id {
            if let Some(prior) = state.subscriptions.get_mut(&prior_id) {
                prior.status = SubscriptionStatus::Canceled;
                prior.canceled_at = Some(now);
            }
        }

        let updated_attempt = {
            let a = state
                .attempts
                .get_mut(&attempt_id)
                .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?;
            a.status = AttemptStatus::Success;
            a.gateway_payment_id = Some(gateway_payment_id.to_string());
            a.settled_at = Some(now);
            a.clone()
        };

        let updated_invoice = {
            let inv = state
                .invoices
                .get_mut(&invoice_id)
                .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;
            inv.status = InvoiceStatus::Paid;
            inv.paid_at = Some(now);
            inv.clone()
        };

        let row = subscription.into_subscription(invoice_id, now);
        state.subscriptions.insert(row.id, row.clone());

        Ok(SettleOutcome::Settled {
            attempt: updated_attempt,
            invoice: updated_invoice,
            subscription: row,
            displaced_subscription_id,
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
        let mut state = self.state.lock().await;
        let now = OffsetDateTime::now_utc();

        let attempt = state
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?;
        if attempt.status.is_terminal() {
            return Ok(FailOutcome::AlreadyTerminal { attempt });
        }

        let invoice_id = attempt.invoice_id;
        let updated_attempt = {
            let a = state
                .attempts
                .get_mut(&attempt_id)
                .ok_or_else(|| BillingError::NotFound(format!("payment attempt {attempt_id}")))?;
            a.status = terminal;
            a.error_message = Some(error_message.to_string());
            a.settled_at = Some(now);
            a.clone()
        };

        let mut invoice_voided = false;
        if let Some(inv) = state.invoices.get_mut(&invoice_id) {
            if inv.status == InvoiceStatus::Open {
                inv.status = InvoiceStatus::Void;
                inv.voided_at = Some(now);
                invoice_voided = true;
            }
        }

        Ok(FailOutcome::Applied {
            attempt: updated_attempt,
            invoice_voided,
        })
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.state.lock().await.subscriptions.get(&id).cloned())
    }

    async fn find_active_subscription(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| {
                s.billing_account_id == billing_account_id
                    && s.status == SubscriptionStatus::Active
            })
            .max_by_key(|s| s.current_period_start)
            .cloned())
    }

    async fn find_subscription_by_invoice(
        &self,
        invoice_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.invoice_id == Some(invoice_id))
            .cloned())
    }

    async fn cancel_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let mut state = self.state.lock().await;
        match state.subscriptions.get_mut(&id) {
            Some(sub) if sub.status == SubscriptionStatus::Active => {
                sub.status = SubscriptionStatus::Canceled;
                sub.canceled_at = Some(OffsetDateTime::now_utc());
                Ok(Some(sub.clone()))
            }
            Some(sub) => Ok(Some(sub.clone())),
            None => Ok(None),
        }
    }

    async fn find_trial(&self, billing_account_id: Uuid) -> BillingResult<Option<TrialSession>> {
        let state = self.state.lock().await;
        Ok(state
            .trials
            .values()
            .filter(|t| t.billing_account_id == billing_account_id)
            .max_by_key(|t| t.started_at)
            .cloned())
    }

    async fn insert_trial(&self, trial: &TrialSession) -> BillingResult<()> {
        self.state
            .lock()
            .await
            .trials
            .insert(trial.id, trial.clone());
        Ok(())
    }

    async fn update_trial(&self, trial: &TrialSession) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        if !state.trials.contains_key(&trial.id) {
            return Err(BillingError::NotFound(format!("trial {}", trial.id)));
        }
        state.trials.insert(trial.id, trial.clone());
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Row counts for test assertions.
    pub async fn subscription_count(&self, billing_account_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .subscriptions
            .values()
            .filter(|s| s.billing_account_id == billing_account_id)
            .count()
    }

    pub async fn attempt_count(&self, billing_account_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .attempts
            .values()
            .filter(|a| a.billing_account_id == billing_account_id)
            .count()
    }
}
