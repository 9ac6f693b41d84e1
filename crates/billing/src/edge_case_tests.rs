// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Exercises the settlement and checkout guarantees end-to-end against the
//! in-memory store:
//! - Idempotent checkout and idempotency-key conflicts
//! - Exactly-once settlement under concurrent deliveries
//! - Single-active-subscription displacement
//! - Integrity tamper detection and amount drift rejection
//! - Trial conversion on settlement
//! - Webhook correlation and duplicate delivery handling

use std::sync::Arc;

use uuid::Uuid;
use veridex_shared::{
    AttemptStatus, BillingTerm, InvoiceStatus, PaymentProvider, PlanType, SubscriptionStatus,
    TrialStatus,
};

use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::external::{
    AllowAllCompliance, ComplianceGate, ComplianceRequest, InMemoryDirectory,
    OrganizationDirectory, OrganizationRecord, TracingAuditLog,
};
use crate::settlement::ProviderCharge;
use crate::store::{BillingStore, MemoryStore};
use crate::{BillingService, CheckoutRequest, MockSimulation};

fn mock_config() -> BillingConfig {
    BillingConfig {
        provider: PaymentProvider::Mock,
        stripe: None,
        sslcommerz: None,
        app_base_url: "https://app.veridex.test".to_string(),
    }
}

fn org_record(id: Uuid, plan: PlanType) -> OrganizationRecord {
    OrganizationRecord {
        id,
        name: "Acme Verification Ltd".to_string(),
        email: Some("billing@acme.test".to_string()),
        address: Some("1 Registry Way".to_string()),
        phone: Some("+100000000".to_string()),
        plan_type: plan,
        deleted_at: None,
    }
}

struct Harness {
    service: BillingService,
    store: Arc<MemoryStore>,
    directory: Arc<InMemoryDirectory>,
    org_id: Uuid,
}

async fn harness() -> Harness {
    harness_with(mock_config(), Arc::new(AllowAllCompliance)).await
}

async fn harness_with(config: BillingConfig, compliance: Arc<dyn ComplianceGate>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let org_id = Uuid::new_v4();
    directory.upsert(org_record(org_id, PlanType::Free)).await;

    let service = BillingService::new(
        config,
        store.clone(),
        directory.clone(),
        Arc::new(TracingAuditLog),
        compliance,
    )
    .unwrap();

    Harness {
        service,
        store,
        directory,
        org_id,
    }
}

fn checkout_request(org_id: Uuid, plan: PlanType, key: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        organization_id: org_id,
        plan,
        term: Some(BillingTerm::Monthly),
        duration_days: None,
        amount_cents: None,
        currency: None,
        idempotency_key: key.map(str::to_string),
        actor_role: None,
    }
}

mod checkout_tests {
    use super::*;

    // =========================================================================
    // Idempotent checkout: same key + same payload replays the same pair
    // =========================================================================
    #[tokio::test]
    async fn same_key_same_payload_replays_pair() {
        let h = harness().await;
        let first = h
            .service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Basic, Some("key-1")))
            .await
            .unwrap();
        assert!(!first.idempotent);

        let second = h
            .service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Basic, Some("key-1")))
            .await
            .unwrap();
        assert!(second.idempotent);
        assert_eq!(second.invoice.id, first.invoice.id);
        assert_eq!(second.attempt.id, first.attempt.id);
        assert_eq!(second.redirect_url, first.redirect_url);

        // No second row was created
        let account = h
            .store
            .find_account_by_org(h.org_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.attempt_count(account.id).await, 1);
    }

    // =========================================================================
    // Idempotency conflict: same key, different payload is a hard failure
    // =========================================================================
    #[tokio::test]
    async fn same_key_different_payload_conflicts() {
        let h = harness().await;
        h.service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Basic, Some("key-1")))
            .await
            .unwrap();

        let err = h
            .service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Pro, Some("key-1")))
            .await;
        assert!(matches!(err, Err(BillingError::IdempotencyKeyReuse)));

        let account = h
            .store
            .find_account_by_org(h.org_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.attempt_count(account.id).await, 1);
    }

    // =========================================================================
    // Checkout creates the pair in OPEN/PENDING with the table price
    // =========================================================================
    #[tokio::test]
    async fn checkout_creates_open_pending_pair() {
        let h = harness().await;
        let outcome = h
            .service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Basic, None))
            .await
            .unwrap();

        assert_eq!(outcome.invoice.amount_cents, 4_900);
        assert_eq!(outcome.invoice.currency, "USD");
        assert_eq!(outcome.invoice.status, InvoiceStatus::Open);
        assert_eq!(outcome.attempt.status, AttemptStatus::Pending);
        assert_eq!(outcome.attempt.amount_cents, outcome.invoice.amount_cents);
        assert!(outcome.redirect_url.is_some());
        assert!(!outcome.invoice.integrity_hash.is_empty());
    }

    // =========================================================================
    // FREE plan has no checkout flow
    // =========================================================================
    #[tokio::test]
    async fn free_plan_rejected() {
        let h = harness().await;
        let err = h
            .service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Free, None))
            .await;
        assert!(matches!(err, Err(BillingError::InvalidPlan(_))));
    }

    // =========================================================================
    // Enterprise checkout requires an amount and consults the gate
    // =========================================================================
    #[tokio::test]
    async fn enterprise_amount_and_compliance() {
        struct DenyAll;
        #[async_trait::async_trait]
        impl ComplianceGate for DenyAll {
            async fn assert_compliance(
                &self,
                request: ComplianceRequest,
            ) -> crate::error::BillingResult<()> {
                Err(BillingError::ComplianceDenied {
                    code: "policy_hold".to_string(),
                    enterprise_id: request.enterprise_id,
                    action: request.action,
                    reason: "billing changes frozen".to_string(),
                })
            }
        }

        let h = harness_with(mock_config(), Arc::new(DenyAll)).await;
        // Organization is on the enterprise plan already
        h.directory
            .upsert(org_record(h.org_id, PlanType::Enterprise))
            .await;

        let mut request = checkout_request(h.org_id, PlanType::Enterprise, None);
        request.amount_cents = Some(250_000);
        let err = h.service.checkout.initiate(request).await;
        assert!(matches!(err, Err(BillingError::ComplianceDenied { .. })));

        // With an allowing gate the amount is still mandatory
        let h = harness().await;
        h.directory
            .upsert(org_record(h.org_id, PlanType::Enterprise))
            .await;
        let err = h
            .service
            .checkout
            .initiate(checkout_request(h.org_id, PlanType::Enterprise, None))
            .await;
        assert!(matches!(err, Err(BillingError::AmountRequired)));
    }
}

mod settlement_tests {
    use super::*;

    // =========================================================================
    // Example end-to-end: BASIC/MONTHLY checkout then mock success
    // =========================================================================
    #[tokio::test]
    async fn basic_monthly_end_to_end() {
        let h = harness().await;
        let (outcome, settlement) = h
            .service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Basic, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();
        let settlement = settlement.unwrap();
        assert_eq!(settlement.attempt_status, AttemptStatus::Success);

        let invoice = h
            .store
            .get_invoice(outcome.invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(invoice.paid_at.is_some());

        let subscription = h
            .store
            .get_subscription(settlement.subscription_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(subscription.plan, PlanType::Basic);
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(
            (subscription.current_period_end - subscription.current_period_start).whole_days(),
            30
        );

        // Plan was pushed into the organization record
        let org = h
            .directory
            .get_organization(h.org_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(org.plan_type, PlanType::Basic);

        // Gateway marker recorded on the account
        let account = h
            .store
            .find_account_by_org(h.org_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.last_gateway, Some(PaymentProvider::Mock));
    }

    // =========================================================================
    // Exactly-one settlement under concurrent success deliveries
    // =========================================================================
    #[tokio::test]
    async fn concurrent_settlements_create_one_subscription() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Pro, None), None)
            .await
            .unwrap();
        let attempt_id = outcome.attempt.id;

        let e1 = h.service.settlement.clone();
        let e2 = h.service.settlement.clone();
        let (r1, r2) = tokio::join!(
            e1.activate_success(attempt_id, "pay_a", None),
            e2.activate_success(attempt_id, "pay_b", None)
        );
        let r1 = r1.unwrap();
        let r2 = r2.unwrap();

        assert_eq!(r1.subscription_id, r2.subscription_id);
        assert!(r1.subscription_id.is_some());
        // Exactly one call performed the transition
        assert!(r1.idempotent != r2.idempotent);

        let account = h
            .store
            .find_account_by_org(h.org_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.subscription_count(account.id).await, 1);
    }

    // =========================================================================
    // Duplicate webhook replay returns the prior settlement unchanged
    // =========================================================================
    #[tokio::test]
    async fn duplicate_success_delivery_is_replayed() {
        let h = harness().await;
        let (outcome, settlement) = h
            .service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Basic, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();
        let first = settlement.unwrap();

        let replay = h
            .service
            .settlement
            .activate_success(outcome.attempt.id, "later_ref", None)
            .await
            .unwrap();
        assert!(replay.idempotent);
        assert!(replay.replayed);
        assert_eq!(replay.subscription_id, first.subscription_id);
    }

    // =========================================================================
    // Single active subscription: second settlement displaces the first
    // =========================================================================
    #[tokio::test]
    async fn second_settlement_displaces_prior_active() {
        let h = harness().await;
        let (_, first) = h
            .service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Basic, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();
        let first_sub = first.unwrap().subscription_id.unwrap();

        let (_, second) = h
            .service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Pro, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();
        let second_sub = second.unwrap().subscription_id.unwrap();

        let account = h
            .store
            .find_account_by_org(h.org_id)
            .await
            .unwrap()
            .unwrap();
        let active = h
            .store
            .find_active_subscription(account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second_sub);
        assert_eq!(active.plan, PlanType::Pro);

        let prior = h.store.get_subscription(first_sub).await.unwrap().unwrap();
        assert_eq!(prior.status, SubscriptionStatus::Canceled);
        assert!(prior.canceled_at.is_some());
    }

    // =========================================================================
    // Integrity tamper: out-of-band amount mutation voids the invoice
    // =========================================================================
    #[tokio::test]
    async fn tampered_invoice_fails_and_voids() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        // Mutate the stored invoice (and mirror the attempt so the internal
        // amount equality check passes; the digest must still catch it).
        let mut invoice = h
            .store
            .get_invoice(outcome.invoice.id)
            .await
            .unwrap()
            .unwrap();
        let mut attempt = h
            .store
            .get_attempt(outcome.attempt.id)
            .await
            .unwrap()
            .unwrap();
        invoice.amount_cents = 1;
        attempt.amount_cents = 1;
        h.store.insert_checkout_pair(&invoice, &attempt).await.unwrap();

        let err = h
            .service
            .settlement
            .activate_success(outcome.attempt.id, "pay_x", None)
            .await;
        assert!(matches!(err, Err(BillingError::IntegrityViolation(_))));

        let invoice = h
            .store
            .get_invoice(outcome.invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Void);
        let attempt = h
            .store
            .get_attempt(outcome.attempt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Failed);
    }

    // =========================================================================
    // Amount drift: provider-confirmed amount differs, attempt stays PENDING
    // =========================================================================
    #[tokio::test]
    async fn provider_amount_mismatch_leaves_pending() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let err = h
            .service
            .settlement
            .activate_success(
                outcome.attempt.id,
                "pay_x",
                Some(ProviderCharge {
                    amount_cents: Some(100),
                    currency: Some("USD".to_string()),
                }),
            )
            .await;
        assert!(matches!(
            err,
            Err(BillingError::ProviderAmountMismatch {
                expected: 4_900,
                reported: 100
            })
        ));

        let attempt = h
            .store
            .get_attempt(outcome.attempt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Pending);

        // A matching confirmation still settles afterwards
        let result = h
            .service
            .settlement
            .activate_success(
                outcome.attempt.id,
                "pay_x",
                Some(ProviderCharge {
                    amount_cents: Some(4_900),
                    currency: Some("usd".to_string()),
                }),
            )
            .await
            .unwrap();
        assert_eq!(result.attempt_status, AttemptStatus::Success);
    }

    // =========================================================================
    // Currency drift is rejected the same way
    // =========================================================================
    #[tokio::test]
    async fn provider_currency_mismatch_rejected() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let err = h
            .service
            .settlement
            .activate_success(
                outcome.attempt.id,
                "pay_x",
                Some(ProviderCharge {
                    amount_cents: Some(4_900),
                    currency: Some("EUR".to_string()),
                }),
            )
            .await;
        assert!(matches!(
            err,
            Err(BillingError::ProviderCurrencyMismatch { .. })
        ));
    }

    // =========================================================================
    // Trial conversion: settlement converts the active trial
    // =========================================================================
    #[tokio::test]
    async fn settlement_converts_active_trial() {
        let h = harness().await;
        let (account, _) = h.service.accounts.resolve(h.org_id).await.unwrap();
        h.service
            .trials
            .start_trial(account.id, PlanType::Pro, 14)
            .await
            .unwrap();

        h.service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Pro, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();

        let trial = h.store.find_trial(account.id).await.unwrap().unwrap();
        assert_eq!(trial.status, TrialStatus::Converted);
        assert!(trial.converted_at.is_some());
    }

    // =========================================================================
    // Failure callbacks void the invoice; success afterwards is a no-op
    // =========================================================================
    #[tokio::test]
    async fn failure_then_late_success_is_noop() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let failed = h
            .service
            .apply_mock_result(outcome.attempt.id, MockSimulation::Failure, None)
            .await
            .unwrap();
        assert_eq!(failed.attempt_status, AttemptStatus::Failed);

        let invoice = h
            .store
            .get_invoice(outcome.invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Void);

        // Out-of-order success arrives afterwards: idempotent no-op, no
        // subscription is created
        let late = h
            .service
            .settlement
            .activate_success(outcome.attempt.id, "late_pay", None)
            .await
            .unwrap();
        assert!(late.idempotent);
        assert_eq!(late.attempt_status, AttemptStatus::Failed);
        assert!(late.subscription_id.is_none());
    }

    // =========================================================================
    // Cancel simulation resolves as CANCELED
    // =========================================================================
    #[tokio::test]
    async fn cancel_resolves_canceled() {
        let h = harness().await;
        let (outcome, settlement) = h
            .service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Team, None),
                Some(MockSimulation::Cancel),
            )
            .await
            .unwrap();
        assert_eq!(
            settlement.unwrap().attempt_status,
            AttemptStatus::Canceled
        );
        let invoice = h
            .store
            .get_invoice(outcome.invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Void);
    }
}

mod webhook_tests {
    use super::*;
    use crate::integrity::IntegrityGuard;
    use serde_json::json;

    fn stripe_payload(attempt_id: Option<Uuid>, payment_status: &str, amount: i64) -> String {
        let mut metadata = serde_json::Map::new();
        if let Some(id) = attempt_id {
            metadata.insert("attempt_id".to_string(), json!(id.to_string()));
        }
        json!({
            "id": "evt_test_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "payment_status": payment_status,
                    "amount_total": amount,
                    "currency": "usd",
                    "metadata": metadata,
                }
            }
        })
        .to_string()
    }

    // =========================================================================
    // Paid checkout.session.completed settles the attempt
    // =========================================================================
    #[tokio::test]
    async fn paid_event_settles() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&stripe_payload(Some(outcome.attempt.id), "paid", 4_900), None)
            .await
            .unwrap();
        assert!(!ack.ignored);
        assert!(ack.error.is_none());
        assert!(ack.subscription_id.is_some());

        // Second delivery of the same event is acknowledged idempotently
        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&stripe_payload(Some(outcome.attempt.id), "paid", 4_900), None)
            .await
            .unwrap();
        assert!(ack.idempotent);
        assert!(ack.error.is_none());
    }

    // =========================================================================
    // Events without attempt correlation are acknowledged and ignored
    // =========================================================================
    #[tokio::test]
    async fn uncorrelated_event_is_ignored() {
        let h = harness().await;
        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&stripe_payload(None, "paid", 4_900), None)
            .await
            .unwrap();
        assert!(ack.ignored);
        assert!(ack.error.is_none());
    }

    // =========================================================================
    // Unpaid completion is acknowledged but does not settle
    // =========================================================================
    #[tokio::test]
    async fn unpaid_completion_awaits_async_result() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(
                &stripe_payload(Some(outcome.attempt.id), "unpaid", 4_900),
                None,
            )
            .await
            .unwrap();
        assert!(ack.ignored);

        let attempt = h
            .store
            .get_attempt(outcome.attempt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Pending);
    }

    // =========================================================================
    // Provider amount drift via webhook is absorbed into the ack
    // =========================================================================
    #[tokio::test]
    async fn webhook_amount_drift_acknowledged_with_error() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&stripe_payload(Some(outcome.attempt.id), "paid", 100), None)
            .await
            .unwrap();
        assert!(ack.error.is_some());
        let attempt = h
            .store
            .get_attempt(outcome.attempt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Pending);
    }

    // =========================================================================
    // Unknown event types are acknowledged and ignored
    // =========================================================================
    #[tokio::test]
    async fn unknown_event_type_ignored() {
        let h = harness().await;
        let payload = json!({
            "id": "evt_x",
            "type": "customer.created",
            "data": { "object": {} }
        })
        .to_string();
        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&payload, None)
            .await
            .unwrap();
        assert!(ack.ignored);
    }

    // =========================================================================
    // Configured secret: signature is required and verified
    // =========================================================================
    #[tokio::test]
    async fn signature_enforced_when_secret_configured() {
        let mut config = mock_config();
        config.stripe = Some(crate::config::StripeGatewayConfig {
            secret_key: "sk_test_x".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
        });
        let h = harness_with(config, Arc::new(AllowAllCompliance)).await;

        let payload = stripe_payload(None, "paid", 100);
        // Missing signature rejected
        assert!(matches!(
            h.service.webhooks.handle_stripe_payload(&payload, None).await,
            Err(BillingError::WebhookSignatureInvalid)
        ));

        // Correct signature accepted
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let signature = IntegrityGuard::sign_payload(&value, "whsec_test").unwrap();
        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&payload, Some(&signature))
            .await
            .unwrap();
        assert!(ack.ignored);
    }

    // =========================================================================
    // Expired session cancels; async failure fails
    // =========================================================================
    #[tokio::test]
    async fn expiry_and_failure_events_resolve_attempts() {
        let h = harness().await;
        let (outcome, _) = h
            .service
            .mock_checkout(checkout_request(h.org_id, PlanType::Basic, None), None)
            .await
            .unwrap();

        let payload = json!({
            "id": "evt_exp",
            "type": "checkout.session.expired",
            "data": { "object": {
                "id": "cs_1",
                "metadata": { "attempt_id": outcome.attempt.id.to_string() }
            }}
        })
        .to_string();
        let ack = h
            .service
            .webhooks
            .handle_stripe_payload(&payload, None)
            .await
            .unwrap();
        assert!(!ack.ignored);

        let attempt = h
            .store
            .get_attempt(outcome.attempt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Canceled);
    }
}

mod admin_tests {
    use super::*;

    // =========================================================================
    // Manual invoice + offline payment settles like any other attempt
    // =========================================================================
    #[tokio::test]
    async fn manual_invoice_offline_payment() {
        let h = harness().await;
        let admin_id = Uuid::new_v4();
        let outcome = h
            .service
            .admin
            .create_manual_invoice(
                admin_id,
                h.org_id,
                PlanType::Enterprise,
                Some(BillingTerm::Annual),
                Some(365),
                Some(1_200_000),
                Some("negotiated contract".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.invoice.amount_cents, 1_200_000);
        assert!(outcome.redirect_url.is_none());

        let result = h
            .service
            .admin
            .apply_offline_payment(admin_id, outcome.attempt.id, Some("wire-784".to_string()))
            .await
            .unwrap();
        assert_eq!(result.attempt_status, AttemptStatus::Success);
        assert!(result.subscription_id.is_some());

        let sub = h
            .store
            .get_subscription(result.subscription_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.plan, PlanType::Enterprise);
        assert_eq!(sub.duration_days, 365);
    }

    // =========================================================================
    // Admin cancel resolves the active subscription
    // =========================================================================
    #[tokio::test]
    async fn admin_cancel_active_subscription() {
        let h = harness().await;
        let admin_id = Uuid::new_v4();
        h.service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Pro, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();

        let canceled = h
            .service
            .admin
            .cancel_subscription(admin_id, h.org_id, Some("customer request".to_string()))
            .await
            .unwrap();
        assert!(canceled.is_some());

        // Nothing left to cancel: idempotent None
        let again = h
            .service
            .admin
            .cancel_subscription(admin_id, h.org_id, None)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    // =========================================================================
    // Refund flag set/clear; trial extension
    // =========================================================================
    #[tokio::test]
    async fn refund_flag_and_trial_extension() {
        let h = harness().await;
        let admin_id = Uuid::new_v4();
        let (outcome, _) = h
            .service
            .mock_checkout(
                checkout_request(h.org_id, PlanType::Basic, None),
                Some(MockSimulation::Success),
            )
            .await
            .unwrap();

        h.service
            .admin
            .flag_refund(admin_id, outcome.invoice.id, true, Some("dispute".to_string()))
            .await
            .unwrap();
        let invoice = h
            .store
            .get_invoice(outcome.invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert!(invoice.refund_flagged);

        // Trial extension requires an active trial
        assert!(h
            .service
            .admin
            .extend_trial(admin_id, h.org_id, 7)
            .await
            .is_err());
        let (account, _) = h.service.accounts.resolve(h.org_id).await.unwrap();
        h.service
            .trials
            .start_trial(account.id, PlanType::Team, 14)
            .await
            .unwrap();
        let trial = h
            .service
            .admin
            .extend_trial(admin_id, h.org_id, 7)
            .await
            .unwrap();
        assert_eq!(trial.status, TrialStatus::Active);
    }
}
