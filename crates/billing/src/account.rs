//! Billing account resolution
//!
//! One billing account per organization, created lazily on first checkout.
//! Cached billing contact fields are kept in sync with the organization
//! record on every resolution.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::external::{OrganizationDirectory, OrganizationRecord};
use crate::store::{BillingAccount, BillingStore};

/// Find-or-create resolver for the per-organization billing record.
#[derive(Clone)]
pub struct AccountResolver {
    store: Arc<dyn BillingStore>,
    directory: Arc<dyn OrganizationDirectory>,
}

impl AccountResolver {
    pub fn new(store: Arc<dyn BillingStore>, directory: Arc<dyn OrganizationDirectory>) -> Self {
        Self { store, directory }
    }

    /// Resolve the billing account for an organization, creating it on first
    /// use and syncing cached contact fields from the directory record.
    ///
    /// Returns the account together with the organization record so callers
    /// don't look it up twice.
    pub async fn resolve(
        &self,
        organization_id: Uuid,
    ) -> BillingResult<(BillingAccount, OrganizationRecord)> {
        let org = self
            .directory
            .get_organization(organization_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("organization {organization_id}")))?;
        if org.deleted_at.is_some() {
            return Err(BillingError::Validation(format!(
                "organization {organization_id} is deleted"
            )));
        }

        let account = match self.store.find_account_by_org(organization_id).await? {
            Some(existing) => {
                let email_changed = org.email.is_some() && org.email != existing.billing_email;
                let name_changed = existing.billing_name.as_deref() != Some(org.name.as_str());
                if email_changed || name_changed {
                    self.store
                        .update_account_contact(
                            existing.id,
                            org.email.as_deref(),
                            Some(org.name.as_str()),
                        )
                        .await?;
                    self.store
                        .get_account(existing.id)
                        .await?
                        .ok_or_else(|| {
                            BillingError::Internal(format!(
                                "billing account {} vanished during contact sync",
                                existing.id
                            ))
                        })?
                } else {
                    existing
                }
            }
            None => {
                let account =
                    BillingAccount::new(organization_id, org.email.clone(), Some(org.name.clone()));
                self.store.insert_account(&account).await?;
                tracing::info!(
                    organization_id = %organization_id,
                    billing_account_id = %account.id,
                    "Created billing account"
                );
                account
            }
        };

        Ok((account, org))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryDirectory;
    use crate::store::MemoryStore;
    use veridex_shared::PlanType;

    fn org(id: Uuid, name: &str, email: Option<&str>) -> OrganizationRecord {
        OrganizationRecord {
            id,
            name: name.to_string(),
            email: email.map(str::to_string),
            address: None,
            phone: None,
            plan_type: PlanType::Free,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn creates_account_on_first_use() {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let org_id = Uuid::new_v4();
        directory
            .upsert(org(org_id, "Acme Verification", Some("billing@acme.test")))
            .await;

        let resolver = AccountResolver::new(store.clone(), directory);
        let (account, _) = resolver.resolve(org_id).await.unwrap();
        assert_eq!(account.organization_id, org_id);
        assert_eq!(account.billing_email.as_deref(), Some("billing@acme.test"));

        // Second resolution returns the same account
        let (again, _) = resolver.resolve(org_id).await.unwrap();
        assert_eq!(again.id, account.id);
    }

    #[tokio::test]
    async fn syncs_contact_fields_on_change() {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let org_id = Uuid::new_v4();
        directory.upsert(org(org_id, "Acme", None)).await;

        let resolver = AccountResolver::new(store.clone(), directory.clone());
        let (account, _) = resolver.resolve(org_id).await.unwrap();
        assert_eq!(account.billing_email, None);

        directory
            .upsert(org(org_id, "Acme Ltd", Some("new@acme.test")))
            .await;
        let (updated, _) = resolver.resolve(org_id).await.unwrap();
        assert_eq!(updated.id, account.id);
        assert_eq!(updated.billing_email.as_deref(), Some("new@acme.test"));
        assert_eq!(updated.billing_name.as_deref(), Some("Acme Ltd"));
    }

    #[tokio::test]
    async fn unknown_organization_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let resolver = AccountResolver::new(store, directory);
        assert!(matches!(
            resolver.resolve(Uuid::new_v4()).await,
            Err(BillingError::NotFound(_))
        ));
    }
}
