//! Billing storage
//!
//! Record types and the `BillingStore` trait. The store owns the atomic
//! transition primitives the settlement engine relies on: both
//! `settle_attempt_success` and `fail_attempt` re-read the attempt status
//! inside the transaction (or lock) before mutating, so two concurrent
//! deliveries for the same attempt observe exactly one PENDING-to-terminal
//! transition.
//!
//! Two implementations are provided: `MemoryStore` for tests and the mock
//! provider path, and `PgStore` for production.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use veridex_shared::{
    AttemptStatus, BillingTerm, InvoiceStatus, PaymentProvider, PlanType, SubscriptionStatus,
    TrialStatus,
};

use crate::error::BillingResult;

/// Per-organization billing identity. Created lazily on first checkout,
/// never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct BillingAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub billing_email: Option<String>,
    pub billing_name: Option<String>,
    /// Gateway that last settled a payment for this account
    pub last_gateway: Option<PaymentProvider>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl BillingAccount {
    pub fn new(
        organization_id: Uuid,
        billing_email: Option<String>,
        billing_name: Option<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            billing_email,
            billing_name,
            last_gateway: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What an invoice is paying for.
///
/// Serialized to a flexible JSON column but decoded through this typed
/// representation before any settlement decision reads it. Carries enough to
/// reconstruct intent without consulting any other table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "snake_case")]
pub enum InvoicePurpose {
    SelfServeCheckout {
        organization_id: Uuid,
        plan: PlanType,
        term: BillingTerm,
        duration_days: i64,
        provider: PaymentProvider,
    },
    EnterpriseCheckout {
        organization_id: Uuid,
        plan: PlanType,
        term: BillingTerm,
        duration_days: i64,
        provider: PaymentProvider,
    },
    ManualAdminInvoice {
        organization_id: Uuid,
        plan: PlanType,
        term: BillingTerm,
        duration_days: i64,
        provider: PaymentProvider,
        issued_by: Uuid,
        note: Option<String>,
    },
}

impl InvoicePurpose {
    pub fn organization_id(&self) -> Uuid {
        match self {
            InvoicePurpose::SelfServeCheckout {
                organization_id, ..
            }
            | InvoicePurpose::EnterpriseCheckout {
                organization_id, ..
            }
            | InvoicePurpose::ManualAdminInvoice {
                organization_id, ..
            } => *organization_id,
        }
    }

    pub fn plan(&self) -> PlanType {
        match self {
            InvoicePurpose::SelfServeCheckout { plan, .. }
            | InvoicePurpose::EnterpriseCheckout { plan, .. }
            | InvoicePurpose::ManualAdminInvoice { plan, .. } => *plan,
        }
    }

    pub fn term(&self) -> BillingTerm {
        match self {
            InvoicePurpose::SelfServeCheckout { term, .. }
            | InvoicePurpose::EnterpriseCheckout { term, .. }
            | InvoicePurpose::ManualAdminInvoice { term, .. } => *term,
        }
    }

    pub fn duration_days(&self) -> i64 {
        match self {
            InvoicePurpose::SelfServeCheckout { duration_days, .. }
            | InvoicePurpose::EnterpriseCheckout { duration_days, .. }
            | InvoicePurpose::ManualAdminInvoice { duration_days, .. } => *duration_days,
        }
    }

    pub fn provider(&self) -> PaymentProvider {
        match self {
            InvoicePurpose::SelfServeCheckout { provider, .. }
            | InvoicePurpose::EnterpriseCheckout { provider, .. }
            | InvoicePurpose::ManualAdminInvoice { provider, .. } => *provider,
        }
    }
}

/// A priced, stateful record of what is owed for one checkout or
/// admin-billing action.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub billing_account_id: Uuid,
    /// Integer minor currency units
    pub amount_cents: i64,
    /// Uppercase ISO code
    pub currency: String,
    pub status: InvoiceStatus,
    pub purpose: InvoicePurpose,
    /// Digest binding (organization, plan, amount, currency); see integrity
    pub integrity_hash: String,
    pub redirect_url: Option<String>,
    pub provider_session_id: Option<String>,
    pub refund_flagged: bool,
    pub created_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
    pub voided_at: Option<OffsetDateTime>,
}

impl Invoice {
    pub fn new(
        billing_account_id: Uuid,
        amount_cents: i64,
        currency: &str,
        purpose: InvoicePurpose,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            billing_account_id,
            amount_cents,
            currency: currency.to_uppercase(),
            status: InvoiceStatus::Open,
            purpose,
            integrity_hash: String::new(),
            redirect_url: None,
            provider_session_id: None,
            refund_flagged: false,
            created_at: OffsetDateTime::now_utc(),
            paid_at: None,
            voided_at: None,
        }
    }
}

/// One provider-facing try to collect payment against an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub billing_account_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: AttemptStatus,
    pub gateway: PaymentProvider,
    /// Provider-assigned payment/session identifier
    pub gateway_payment_id: Option<String>,
    pub idempotency_key: Option<String>,
    /// Fingerprint of the logical request, for idempotency-key replay checks
    pub request_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub settled_at: Option<OffsetDateTime>,
}

impl PaymentAttempt {
    pub fn new(
        invoice: &Invoice,
        gateway: PaymentProvider,
        idempotency_key: Option<String>,
        request_hash: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            billing_account_id: invoice.billing_account_id,
            amount_cents: invoice.amount_cents,
            currency: invoice.currency.clone(),
            status: AttemptStatus::Pending,
            gateway,
            gateway_payment_id: None,
            idempotency_key,
            request_hash,
            error_message: None,
            created_at: OffsetDateTime::now_utc(),
            settled_at: None,
        }
    }
}

/// An activated plan for a billing account. At most one ACTIVE row per
/// account at any instant.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub billing_account_id: Uuid,
    /// Invoice whose settlement created this subscription, when applicable
    pub invoice_id: Option<Uuid>,
    pub plan: PlanType,
    pub status: SubscriptionStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub term: BillingTerm,
    pub duration_days: i64,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub canceled_at: Option<OffsetDateTime>,
}

/// Fields for the subscription row created inside a settlement transaction.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub billing_account_id: Uuid,
    pub plan: PlanType,
    pub amount_cents: i64,
    pub currency: String,
    pub term: BillingTerm,
    pub duration_days: i64,
}

impl NewSubscription {
    /// Materialize the subscription row with the settlement timestamp.
    pub fn into_subscription(self, invoice_id: Uuid, now: OffsetDateTime) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            billing_account_id: self.billing_account_id,
            invoice_id: Some(invoice_id),
            plan: self.plan,
            status: SubscriptionStatus::Active,
            amount_cents: self.amount_cents,
            currency: self.currency,
            term: self.term,
            duration_days: self.duration_days,
            current_period_start: now,
            current_period_end: now + Duration::days(self.duration_days),
            canceled_at: None,
        }
    }
}

/// A free evaluation period. Converted, never deleted, when a paid
/// subscription activates.
#[derive(Debug, Clone, Serialize)]
pub struct TrialSession {
    pub id: Uuid,
    pub billing_account_id: Uuid,
    pub plan: PlanType,
    pub status: TrialStatus,
    pub started_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub converted_at: Option<OffsetDateTime>,
}

/// Result of `settle_attempt_success`.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// The attempt transitioned PENDING -> SUCCESS in this call
    Settled {
        attempt: PaymentAttempt,
        invoice: Invoice,
        subscription: Subscription,
        /// Previously ACTIVE subscription canceled in the same transaction
        displaced_subscription_id: Option<Uuid>,
    },
    /// The attempt was already terminal; nothing was changed
    AlreadyTerminal {
        attempt: PaymentAttempt,
        /// Subscription created by the settlement that won, when the attempt
        /// is SUCCESS
        subscription_id: Option<Uuid>,
    },
}

/// Result of `fail_attempt`.
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// The attempt transitioned PENDING -> FAILED/CANCELED in this call
    Applied {
        attempt: PaymentAttempt,
        invoice_voided: bool,
    },
    /// The attempt was already terminal; nothing was changed
    AlreadyTerminal { attempt: PaymentAttempt },
}

/// Persistence operations for billing state.
///
/// Implementations must make the two transition methods atomic per attempt:
/// the status re-check and all dependent writes happen in one database
/// transaction (or under one lock), never as separate steps.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Billing accounts

    async fn find_account_by_org(
        &self,
        organization_id: Uuid,
    ) -> BillingResult<Option<BillingAccount>>;

    async fn get_account(&self, id: Uuid) -> BillingResult<Option<BillingAccount>>;

    async fn insert_account(&self, account: &BillingAccount) -> BillingResult<()>;

    /// Sync cached billing contact fields; `None` leaves a field unchanged.
    async fn update_account_contact(
        &self,
        id: Uuid,
        billing_email: Option<&str>,
        billing_name: Option<&str>,
    ) -> BillingResult<()>;

    async fn set_account_gateway(&self, id: Uuid, gateway: PaymentProvider) -> BillingResult<()>;

    // Invoices and attempts

    /// Persist a new (OPEN invoice, PENDING attempt) pair together.
    async fn insert_checkout_pair(
        &self,
        invoice: &Invoice,
        attempt: &PaymentAttempt,
    ) -> BillingResult<()>;

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>>;

    /// Record the provider redirect artifact on the invoice after initiation.
    async fn set_invoice_checkout_artifacts(
        &self,
        invoice_id: Uuid,
        redirect_url: Option<&str>,
        provider_session_id: Option<&str>,
    ) -> BillingResult<()>;

    async fn set_invoice_refund_flag(&self, invoice_id: Uuid, flagged: bool) -> BillingResult<()>;

    async fn get_attempt(&self, id: Uuid) -> BillingResult<Option<PaymentAttempt>>;

    /// Idempotency lookup, scoped to one billing account.
    async fn find_attempt_by_idempotency_key(
        &self,
        billing_account_id: Uuid,
        key: &str,
    ) -> BillingResult<Option<PaymentAttempt>>;

    /// Record the provider's identifier for a checkout after initiation.
    async fn set_attempt_gateway_reference(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
    ) -> BillingResult<()>;

    // Atomic settlement transitions

    /// Atomically: re-check the attempt is PENDING, mark it SUCCESS, mark the
    /// invoice PAID, cancel any previously ACTIVE subscription on the
    /// account, and insert the new ACTIVE subscription.
    async fn settle_attempt_success(
        &self,
        attempt_id: Uuid,
        gateway_payment_id: &str,
        subscription: NewSubscription,
    ) -> BillingResult<SettleOutcome>;

    /// Atomically: re-check the attempt is PENDING, mark it FAILED or
    /// CANCELED, and VOID the linked invoice (unless already PAID).
    async fn fail_attempt(
        &self,
        attempt_id: Uuid,
        terminal: AttemptStatus,
        error_message: &str,
    ) -> BillingResult<FailOutcome>;

    // Subscriptions

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    async fn find_active_subscription(
        &self,
        billing_account_id: Uuid,
    ) -> BillingResult<Option<Subscription>>;

    async fn find_subscription_by_invoice(
        &self,
        invoice_id: Uuid,
    ) -> BillingResult<Option<Subscription>>;

    /// Cancel a subscription if it is still ACTIVE; returns the updated row.
    async fn cancel_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    // Trials

    /// Most recent trial session for the account, regardless of status.
    async fn find_trial(&self, billing_account_id: Uuid) -> BillingResult<Option<TrialSession>>;

    async fn insert_trial(&self, trial: &TrialSession) -> BillingResult<()>;

    async fn update_trial(&self, trial: &TrialSession) -> BillingResult<()>;
}
