//! Trial sessions
//!
//! Trials have no background expiry job; expiry is applied when the trial is
//! read. An active trial is converted (never deleted) when a paid
//! subscription activates on the same billing account.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use veridex_shared::{PlanType, TrialStatus};

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, TrialSession};

#[derive(Clone)]
pub struct TrialService {
    store: Arc<dyn BillingStore>,
}

impl TrialService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Start a trial for an account. Rejected while another trial is active.
    pub async fn start_trial(
        &self,
        billing_account_id: Uuid,
        plan: PlanType,
        days: i64,
    ) -> BillingResult<TrialSession> {
        if days <= 0 {
            return Err(BillingError::Validation(format!(
                "trial length must be positive, got {days}"
            )));
        }
        if self.get_active_trial(billing_account_id).await?.is_some() {
            return Err(BillingError::Validation(
                "account already has an active trial".to_string(),
            ));
        }
        let now = OffsetDateTime::now_utc();
        let trial = TrialSession {
            id: Uuid::new_v4(),
            billing_account_id,
            plan,
            status: TrialStatus::Active,
            started_at: now,
            expires_at: now + Duration::days(days),
            converted_at: None,
        };
        self.store.insert_trial(&trial).await?;
        tracing::info!(
            billing_account_id = %billing_account_id,
            trial_id = %trial.id,
            plan = %plan,
            days = days,
            "Started trial"
        );
        Ok(trial)
    }

    /// Current active trial, applying lapsed expiry on read.
    pub async fn get_active_trial(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<TrialSession>> {
        let Some(mut trial) = self.store.find_trial(billing_account_id).await? else {
            return Ok(None);
        };
        if trial.status != TrialStatus::Active {
            return Ok(None);
        }
        if trial.expires_at <= OffsetDateTime::now_utc() {
            trial.status = TrialStatus::Expired;
            self.store.update_trial(&trial).await?;
            tracing::info!(trial_id = %trial.id, "Trial expired on read");
            return Ok(None);
        }
        Ok(Some(trial))
    }

    /// Mark the account's active trial converted. No-op when there is none.
    pub async fn convert_active_trial(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<TrialSession>> {
        let Some(mut trial) = self.get_active_trial(billing_account_id).await? else {
            return Ok(None);
        };
        trial.status = TrialStatus::Converted;
        trial.converted_at = Some(OffsetDateTime::now_utc());
        self.store.update_trial(&trial).await?;
        tracing::info!(trial_id = %trial.id, "Trial converted");
        Ok(Some(trial))
    }

    /// Push an active trial's expiry out by `extra_days`.
    pub async fn extend_trial(
        &self,
        billing_account_id: Uuid,
        extra_days: i64,
    ) -> BillingResult<TrialSession> {
        if extra_days <= 0 {
            return Err(BillingError::Validation(format!(
                "trial extension must be positive, got {extra_days}"
            )));
        }
        let mut trial = self
            .get_active_trial(billing_account_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!(
                    "no active trial for billing account {billing_account_id}"
                ))
            })?;
        trial.expires_at += Duration::days(extra_days);
        self.store.update_trial(&trial).await?;
        Ok(trial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> (TrialService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TrialService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn trial_lifecycle() {
        let (svc, _) = service();
        let account = Uuid::new_v4();
        let trial = svc.start_trial(account, PlanType::Pro, 14).await.unwrap();
        assert_eq!(trial.status, TrialStatus::Active);

        // A second trial cannot start while one is active
        assert!(svc.start_trial(account, PlanType::Pro, 14).await.is_err());

        let active = svc.get_active_trial(account).await.unwrap().unwrap();
        assert_eq!(active.id, trial.id);

        let converted = svc.convert_active_trial(account).await.unwrap().unwrap();
        assert_eq!(converted.status, TrialStatus::Converted);
        assert!(converted.converted_at.is_some());

        // Converted trials are not active and convert again is a no-op
        assert!(svc.get_active_trial(account).await.unwrap().is_none());
        assert!(svc.convert_active_trial(account).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expiry_applies_on_read() {
        let (svc, store) = service();
        let account = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let trial = TrialSession {
            id: Uuid::new_v4(),
            billing_account_id: account,
            plan: PlanType::Basic,
            status: TrialStatus::Active,
            started_at: now - Duration::days(20),
            expires_at: now - Duration::days(6),
            converted_at: None,
        };
        store.insert_trial(&trial).await.unwrap();

        assert!(svc.get_active_trial(account).await.unwrap().is_none());
        let stored = store.find_trial(account).await.unwrap().unwrap();
        assert_eq!(stored.status, TrialStatus::Expired);
    }

    #[tokio::test]
    async fn extension_moves_expiry() {
        let (svc, _) = service();
        let account = Uuid::new_v4();
        let trial = svc.start_trial(account, PlanType::Team, 7).await.unwrap();
        let extended = svc.extend_trial(account, 7).await.unwrap();
        assert_eq!(extended.id, trial.id);
        assert!(extended.expires_at > trial.expires_at);

        assert!(svc.extend_trial(Uuid::new_v4(), 7).await.is_err());
        assert!(svc.extend_trial(account, 0).await.is_err());
    }
}
