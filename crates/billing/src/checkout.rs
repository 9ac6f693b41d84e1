//! Checkout initiation
//!
//! Resolves pricing and the billing account, performs the idempotency-key
//! lookup-or-create, persists a new (OPEN invoice, PENDING attempt) pair and
//! hands it to the configured gateway adapter. Duplicate submissions with the
//! same key and payload replay the prior pair; the same key with a different
//! payload is a hard conflict.

use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use veridex_shared::{BillingTerm, PaymentProvider, PlanType};

use crate::account::AccountResolver;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::external::{ComplianceGate, ComplianceRequest, OrganizationRecord};
use crate::gateway::{
    CheckoutContext, GatewayAdapter, MockGateway, SslcommerzGateway, StripeGateway,
};
use crate::integrity::{canonical_json, IntegrityGuard};
use crate::pricing::{self, DEFAULT_CURRENCY};
use crate::store::{BillingAccount, BillingStore, Invoice, InvoicePurpose, PaymentAttempt};

/// One checkout request.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub organization_id: Uuid,
    pub plan: PlanType,
    pub term: Option<BillingTerm>,
    /// Explicit period override; also serves as the term-inference hint
    pub duration_days: Option<i64>,
    /// Required for enterprise plans, must match the table for self-serve
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
    /// Role of the caller, forwarded to the compliance gate
    pub actor_role: Option<String>,
}

/// Result of checkout initiation.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub invoice: Invoice,
    pub attempt: PaymentAttempt,
    pub redirect_url: Option<String>,
    /// True when an existing pair was replayed for the idempotency key
    pub idempotent: bool,
}

/// Pending-attempt factory and gateway dispatch.
pub struct CheckoutService {
    config: BillingConfig,
    store: Arc<dyn BillingStore>,
    accounts: AccountResolver,
    compliance: Arc<dyn ComplianceGate>,
    stripe: Option<StripeGateway>,
    sslcommerz: Option<SslcommerzGateway>,
    mock: MockGateway,
}

impl CheckoutService {
    pub fn new(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        accounts: AccountResolver,
        compliance: Arc<dyn ComplianceGate>,
    ) -> BillingResult<Self> {
        let stripe = config
            .stripe
            .as_ref()
            .map(|cfg| StripeGateway::new(cfg, &config.app_base_url));
        let sslcommerz = config
            .sslcommerz
            .as_ref()
            .map(|cfg| SslcommerzGateway::new(cfg, &config.app_base_url))
            .transpose()?;
        let mock = MockGateway::new(&config.app_base_url);
        Ok(Self {
            config,
            store,
            accounts,
            compliance,
            stripe,
            sslcommerz,
            mock,
        })
    }

    /// Initiate a checkout on the process-wide configured provider.
    pub async fn initiate(&self, request: CheckoutRequest) -> BillingResult<CheckoutOutcome> {
        self.initiate_on(request, self.config.provider).await
    }

    /// Initiate a checkout on an explicit provider (the mock checkout path
    /// is gateway-fixed to `mock`).
    pub async fn initiate_on(
        &self,
        request: CheckoutRequest,
        provider: PaymentProvider,
    ) -> BillingResult<CheckoutOutcome> {
        let (account, org) = self.accounts.resolve(request.organization_id).await?;

        // Compliance gate applies to organizations already on the
        // enterprise plan, before any row is created.
        if org.plan_type == PlanType::Enterprise {
            self.compliance
                .assert_compliance(ComplianceRequest {
                    enterprise_id: org.id,
                    action: "billing.checkout".to_string(),
                    actor_role: request
                        .actor_role
                        .clone()
                        .unwrap_or_else(|| "member".to_string()),
                })
                .await?;
        }

        let purpose_for = |price: &pricing::ResolvedPrice| {
            if request.plan == PlanType::Enterprise {
                InvoicePurpose::EnterpriseCheckout {
                    organization_id: org.id,
                    plan: request.plan,
                    term: price.term,
                    duration_days: price.duration_days,
                    provider,
                }
            } else {
                InvoicePurpose::SelfServeCheckout {
                    organization_id: org.id,
                    plan: request.plan,
                    term: price.term,
                    duration_days: price.duration_days,
                    provider,
                }
            }
        };

        let (invoice, attempt, idempotent) = self
            .lookup_or_create_pair(&request, &account, provider, purpose_for)
            .await?;
        if idempotent {
            return Ok(CheckoutOutcome {
                redirect_url: invoice.redirect_url.clone(),
                invoice,
                attempt,
                idempotent: true,
            });
        }

        let redirect = self
            .dispatch_initiation(provider, &org, &invoice, &attempt)
            .await;
        let redirect = match redirect {
            Ok(redirect) => redirect,
            Err(e) => {
                // Never leave a pending pair with no redirect target: a
                // transport failure resolves the attempt and voids the
                // invoice before the error propagates.
                tracing::error!(
                    attempt_id = %attempt.id,
                    invoice_id = %invoice.id,
                    provider = %provider,
                    error = %e,
                    "Checkout initiation failed - resolving pending pair"
                );
                self.store
                    .fail_attempt(
                        attempt.id,
                        veridex_shared::AttemptStatus::Failed,
                        &format!("checkout initiation failed: {e}"),
                    )
                    .await?;
                return Err(e);
            }
        };

        self.store
            .set_attempt_gateway_reference(attempt.id, &redirect.external_id)
            .await?;
        self.store
            .set_invoice_checkout_artifacts(
                invoice.id,
                Some(&redirect.redirect_url),
                Some(&redirect.external_id),
            )
            .await?;

        let invoice = self
            .store
            .get_invoice(invoice.id)
            .await?
            .ok_or_else(|| BillingError::Internal(format!("invoice {} vanished", invoice.id)))?;
        let attempt = self
            .store
            .get_attempt(attempt.id)
            .await?
            .ok_or_else(|| BillingError::Internal(format!("attempt {} vanished", attempt.id)))?;

        Ok(CheckoutOutcome {
            redirect_url: Some(redirect.redirect_url),
            invoice,
            attempt,
            idempotent: false,
        })
    }

    /// Create an OPEN invoice + PENDING attempt for an admin-issued manual
    /// invoice. No gateway initiation; payment is applied offline.
    pub async fn create_manual_invoice(
        &self,
        organization_id: Uuid,
        plan: PlanType,
        term: Option<BillingTerm>,
        duration_days: Option<i64>,
        amount_cents: Option<i64>,
        issued_by: Uuid,
        note: Option<String>,
    ) -> BillingResult<CheckoutOutcome> {
        let (account, org) = self.accounts.resolve(organization_id).await?;
        let price = pricing::resolve_price(plan, term, duration_days, duration_days, amount_cents)?;
        let currency = DEFAULT_CURRENCY.to_string();

        let purpose = InvoicePurpose::ManualAdminInvoice {
            organization_id: org.id,
            plan,
            term: price.term,
            duration_days: price.duration_days,
            provider: PaymentProvider::Mock,
            issued_by,
            note,
        };
        let mut invoice = Invoice::new(account.id, price.amount_cents, &currency, purpose);
        invoice.integrity_hash = IntegrityGuard::compute_invoice_integrity(
            org.id,
            plan,
            invoice.amount_cents,
            &invoice.currency,
        );
        let attempt = PaymentAttempt::new(&invoice, PaymentProvider::Mock, None, None);
        self.store.insert_checkout_pair(&invoice, &attempt).await?;

        tracing::info!(
            organization_id = %organization_id,
            invoice_id = %invoice.id,
            attempt_id = %attempt.id,
            amount_cents = invoice.amount_cents,
            "Created manual invoice"
        );

        Ok(CheckoutOutcome {
            invoice,
            attempt,
            redirect_url: None,
            idempotent: false,
        })
    }

    async fn lookup_or_create_pair(
        &self,
        request: &CheckoutRequest,
        account: &BillingAccount,
        provider: PaymentProvider,
        purpose_for: impl FnOnce(&pricing::ResolvedPrice) -> InvoicePurpose,
    ) -> BillingResult<(Invoice, PaymentAttempt, bool)> {
        let price = pricing::resolve_price(
            request.plan,
            request.term,
            request.duration_days,
            request.duration_days,
            request.amount_cents,
        )?;
        let currency = normalize_currency(request.currency.as_deref())?;

        let request_hash = compute_request_hash(
            request.organization_id,
            request.plan,
            price.amount_cents,
            &currency,
            price.term,
            provider,
            price.duration_days,
        );

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self
                .store
                .find_attempt_by_idempotency_key(account.id, key)
                .await?
            {
                if existing.request_hash.as_deref() != Some(request_hash.as_str()) {
                    tracing::warn!(
                        billing_account_id = %account.id,
                        attempt_id = %existing.id,
                        "Idempotency key reused for a different logical request"
                    );
                    return Err(BillingError::IdempotencyKeyReuse);
                }
                let invoice = self
                    .store
                    .get_invoice(existing.invoice_id)
                    .await?
                    .ok_or_else(|| {
                        BillingError::Internal(format!(
                            "invoice {} missing for replayed attempt {}",
                            existing.invoice_id, existing.id
                        ))
                    })?;
                tracing::info!(
                    billing_account_id = %account.id,
                    attempt_id = %existing.id,
                    "Replaying checkout for idempotency key"
                );
                return Ok((invoice, existing, true));
            }
        }

        let purpose = purpose_for(&price);
        let organization_id = purpose.organization_id();
        let mut invoice = Invoice::new(account.id, price.amount_cents, &currency, purpose);
        invoice.integrity_hash = IntegrityGuard::compute_invoice_integrity(
            organization_id,
            request.plan,
            invoice.amount_cents,
            &invoice.currency,
        );
        let attempt = PaymentAttempt::new(
            &invoice,
            provider,
            request.idempotency_key.clone(),
            Some(request_hash),
        );
        self.store.insert_checkout_pair(&invoice, &attempt).await?;

        tracing::info!(
            billing_account_id = %account.id,
            invoice_id = %invoice.id,
            attempt_id = %attempt.id,
            plan = %request.plan,
            term = %price.term,
            amount_cents = price.amount_cents,
            provider = %provider,
            "Created pending checkout pair"
        );

        Ok((invoice, attempt, false))
    }

    async fn dispatch_initiation(
        &self,
        provider: PaymentProvider,
        org: &OrganizationRecord,
        invoice: &Invoice,
        attempt: &PaymentAttempt,
    ) -> BillingResult<crate::gateway::CheckoutRedirect> {
        let ctx = CheckoutContext {
            organization: org,
            invoice,
            attempt,
        };
        match provider {
            PaymentProvider::Stripe => {
                let gateway = self.stripe.as_ref().ok_or_else(|| {
                    BillingError::Config("stripe gateway is not configured".to_string())
                })?;
                gateway.initiate_checkout(ctx).await
            }
            PaymentProvider::Sslcommerz => {
                let gateway = self.sslcommerz.as_ref().ok_or_else(|| {
                    BillingError::Config("sslcommerz gateway is not configured".to_string())
                })?;
                gateway.initiate_checkout(ctx).await
            }
            PaymentProvider::Mock => self.mock.initiate_checkout(ctx).await,
        }
    }

    /// The SSLCommerz adapter, for settlement-time validation calls.
    pub fn sslcommerz_gateway(&self) -> Option<&SslcommerzGateway> {
        self.sslcommerz.as_ref()
    }
}

/// Idempotency fingerprint of one logical checkout request.
pub fn compute_request_hash(
    organization_id: Uuid,
    plan: PlanType,
    amount_cents: i64,
    currency: &str,
    term: BillingTerm,
    provider: PaymentProvider,
    duration_days: i64,
) -> String {
    let encoded = canonical_json(&json!({
        "organization_id": organization_id.to_string(),
        "plan": plan.as_str(),
        "amount_cents": amount_cents,
        "currency": currency,
        "term": term.as_str(),
        "provider": provider.as_str(),
        "duration_days": duration_days,
    }));
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

fn normalize_currency(currency: Option<&str>) -> BillingResult<String> {
    let currency = currency.unwrap_or(DEFAULT_CURRENCY).trim().to_uppercase();
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(BillingError::Validation(format!(
            "'{currency}' is not an ISO currency code"
        )));
    }
    Ok(currency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_hash_is_stable_and_field_sensitive() {
        let org = Uuid::new_v4();
        let base = compute_request_hash(
            org,
            PlanType::Pro,
            9900,
            "USD",
            BillingTerm::Monthly,
            PaymentProvider::Mock,
            30,
        );
        let same = compute_request_hash(
            org,
            PlanType::Pro,
            9900,
            "USD",
            BillingTerm::Monthly,
            PaymentProvider::Mock,
            30,
        );
        assert_eq!(base, same);

        let different_amount = compute_request_hash(
            org,
            PlanType::Pro,
            9901,
            "USD",
            BillingTerm::Monthly,
            PaymentProvider::Mock,
            30,
        );
        assert_ne!(base, different_amount);

        let different_provider = compute_request_hash(
            org,
            PlanType::Pro,
            9900,
            "USD",
            BillingTerm::Monthly,
            PaymentProvider::Stripe,
            30,
        );
        assert_ne!(base, different_provider);
    }

    #[test]
    fn currency_normalization() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some("usd")).unwrap(), "USD");
        assert_eq!(normalize_currency(Some(" bdt ")).unwrap(), "BDT");
        assert!(normalize_currency(Some("US")).is_err());
        assert!(normalize_currency(Some("dollars")).is_err());
    }
}
