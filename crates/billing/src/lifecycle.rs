//! Subscription lifecycle
//!
//! Settlement owns the ACTIVE-row creation (inside the store transaction);
//! this service carries the post-settlement propagation and the query/cancel
//! operations the admin surface uses. At most one ACTIVE subscription exists
//! per billing account at any instant.

use std::sync::Arc;

use uuid::Uuid;
use veridex_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};
use crate::external::{OrganizationDirectory, OrganizationPlanUpdate};
use crate::store::{BillingStore, Subscription};

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn BillingStore>,
    directory: Arc<dyn OrganizationDirectory>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn BillingStore>, directory: Arc<dyn OrganizationDirectory>) -> Self {
        Self { store, directory }
    }

    /// Current ACTIVE subscription for an account, if any.
    pub async fn current_active(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        self.store.find_active_subscription(billing_account_id).await
    }

    /// Cancel the account's ACTIVE subscription. Idempotent: returns `None`
    /// when there is nothing active to cancel.
    pub async fn cancel_active(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let Some(active) = self.store.find_active_subscription(billing_account_id).await? else {
            return Ok(None);
        };
        let canceled = self.store.cancel_subscription(active.id).await?;
        if let Some(sub) = &canceled {
            if sub.status != SubscriptionStatus::Canceled {
                return Err(BillingError::Internal(format!(
                    "subscription {} did not cancel",
                    sub.id
                )));
            }
            tracing::info!(
                billing_account_id = %billing_account_id,
                subscription_id = %sub.id,
                "Canceled active subscription"
            );
        }
        Ok(canceled)
    }

    /// Push a settled subscription's plan and duration into the organization
    /// record via the directory port.
    pub async fn propagate_plan(
        &self,
        organization_id: Uuid,
        subscription: &Subscription,
    ) -> BillingResult<()> {
        self.directory
            .update_organization_plan(
                organization_id,
                OrganizationPlanUpdate {
                    plan_type: subscription.plan,
                    plan_status: subscription.status.as_str().to_string(),
                    duration_days: subscription.duration_days,
                },
            )
            .await
    }
}
