// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Checkout/settlement operations carry many fields
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Veridex Billing Module
//!
//! Turns a plan-selection request into a durable, exactly-once transition of
//! an organization's subscription state, reconciled against asynchronous,
//! untrusted payment providers.
//!
//! ## Features
//!
//! - **Checkout**: provider-agnostic initiation with idempotency keys
//! - **Integrity**: invoice digests and webhook signature verification
//! - **Settlement**: the attempt/invoice/subscription state machine
//! - **Gateways**: Stripe checkout sessions, SSLCommerz hosted pages, mock
//! - **Trials**: start, convert-on-settlement, extend, expire-on-read
//! - **Admin**: manual invoices, offline payments, cancels, refund flags

pub mod account;
pub mod admin;
pub mod checkout;
pub mod config;
pub mod error;
pub mod external;
pub mod gateway;
pub mod integrity;
pub mod invariants;
pub mod lifecycle;
pub mod pricing;
pub mod settlement;
pub mod store;
pub mod trial;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Account resolution
pub use account::AccountResolver;

// Admin
pub use admin::AdminBillingService;

// Checkout
pub use checkout::{CheckoutOutcome, CheckoutRequest, CheckoutService};

// Config
pub use config::{BillingConfig, SslcommerzConfig, StripeGatewayConfig};

// Error
pub use error::{BillingError, BillingResult};

// Integrity
pub use integrity::IntegrityGuard;

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Lifecycle
pub use lifecycle::LifecycleManager;

// Settlement
pub use settlement::{ProviderCharge, SettlementEngine, SettlementResult};

// Store
pub use store::{
    BillingAccount, BillingStore, Invoice, InvoicePurpose, MemoryStore, PaymentAttempt, PgStore,
    Subscription, TrialSession,
};

// Trials
pub use trial::TrialService;

// Webhooks
pub use webhooks::{SslcommerzCallback, StripeEvent, WebhookAck, WebhookHandler};

use std::sync::Arc;

use uuid::Uuid;
use veridex_shared::AttemptStatus;

use crate::external::{AuditLog, ComplianceGate, OrganizationDirectory};

/// Requested outcome for a simulated mock payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockSimulation {
    Success,
    Failure,
    Cancel,
}

/// Main billing service that wires the billing components together.
///
/// Constructed once at startup from an explicit `BillingConfig` and the
/// collaborator ports; no module-level provider cache exists, so multiple
/// differently-configured services can coexist in one process.
pub struct BillingService {
    pub config: BillingConfig,
    pub accounts: AccountResolver,
    pub checkout: Arc<CheckoutService>,
    pub settlement: SettlementEngine,
    pub subscriptions: LifecycleManager,
    pub trials: TrialService,
    pub webhooks: WebhookHandler,
    pub admin: AdminBillingService,
}

impl BillingService {
    pub fn new(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        directory: Arc<dyn OrganizationDirectory>,
        audit: Arc<dyn AuditLog>,
        compliance: Arc<dyn ComplianceGate>,
    ) -> BillingResult<Self> {
        config.validate()?;

        let guard = IntegrityGuard::new(config.stripe_webhook_secret().map(str::to_string));
        let accounts = AccountResolver::new(store.clone(), directory.clone());
        let trials = TrialService::new(store.clone());
        let subscriptions = LifecycleManager::new(store.clone(), directory);
        let settlement = SettlementEngine::new(
            store.clone(),
            guard.clone(),
            subscriptions.clone(),
            trials.clone(),
        );
        let checkout = Arc::new(CheckoutService::new(
            config.clone(),
            store.clone(),
            accounts.clone(),
            compliance,
        )?);
        let webhooks = WebhookHandler::new(&config, settlement.clone(), guard)?;
        let admin = AdminBillingService::new(
            store,
            checkout.clone(),
            settlement.clone(),
            subscriptions.clone(),
            trials.clone(),
            accounts.clone(),
            audit,
        );

        Ok(Self {
            config,
            accounts,
            checkout,
            settlement,
            subscriptions,
            trials,
            webhooks,
            admin,
        })
    }

    /// Create the billing service from environment variables.
    pub fn from_env(
        store: Arc<dyn BillingStore>,
        directory: Arc<dyn OrganizationDirectory>,
        audit: Arc<dyn AuditLog>,
        compliance: Arc<dyn ComplianceGate>,
    ) -> BillingResult<Self> {
        Self::new(BillingConfig::from_env()?, store, directory, audit, compliance)
    }

    /// Mock checkout: gateway-fixed to `mock`. With a simulate flag the
    /// settlement engine's success/failure path runs in the same call.
    pub async fn mock_checkout(
        &self,
        request: CheckoutRequest,
        simulate: Option<MockSimulation>,
    ) -> BillingResult<(CheckoutOutcome, Option<SettlementResult>)> {
        let outcome = self
            .checkout
            .initiate_on(request, veridex_shared::PaymentProvider::Mock)
            .await?;

        let settlement = match simulate {
            Some(simulation) => Some(
                self.apply_mock_result(outcome.attempt.id, simulation, None)
                    .await?,
            ),
            None => None,
        };
        Ok((outcome, settlement))
    }

    /// Drive a pending mock attempt to its terminal state (test/admin
    /// callback path).
    pub async fn apply_mock_result(
        &self,
        attempt_id: Uuid,
        simulation: MockSimulation,
        reference: Option<String>,
    ) -> BillingResult<SettlementResult> {
        match simulation {
            MockSimulation::Success => {
                let reference =
                    reference.unwrap_or_else(|| format!("mock_pay_{}", attempt_id.simple()));
                self.settlement
                    .activate_success(attempt_id, &reference, None)
                    .await
            }
            MockSimulation::Failure => {
                self.settlement
                    .mark_failed(attempt_id, AttemptStatus::Failed, "simulated failure")
                    .await
            }
            MockSimulation::Cancel => {
                self.settlement
                    .mark_failed(attempt_id, AttemptStatus::Canceled, "simulated cancel")
                    .await
            }
        }
    }
}
