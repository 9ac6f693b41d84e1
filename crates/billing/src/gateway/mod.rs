//! Payment gateway adapters
//!
//! One adapter per provider, all speaking the same contract: turn a pending
//! (invoice, attempt) pair into a provider-specific redirect artifact and a
//! provider-side identifier.

mod mock;
mod sslcommerz;
mod stripe;

pub use mock::MockGateway;
pub use sslcommerz::{SslcommerzGateway, SslcommerzValidation};
pub use stripe::StripeGateway;

use async_trait::async_trait;
use veridex_shared::PaymentProvider;

use crate::error::BillingResult;
use crate::external::OrganizationRecord;
use crate::store::{Invoice, PaymentAttempt};

/// Everything an adapter needs to initiate a checkout.
pub struct CheckoutContext<'a> {
    pub organization: &'a OrganizationRecord,
    pub invoice: &'a Invoice,
    pub attempt: &'a PaymentAttempt,
}

/// Provider redirect artifact produced by checkout initiation.
#[derive(Debug, Clone)]
pub struct CheckoutRedirect {
    /// URL the end user is sent to for payment
    pub redirect_url: String,
    /// Provider-assigned identifier for the checkout (session id, session
    /// key, or mock reference)
    pub external_id: String,
}

/// Common gateway contract.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Create the provider-side checkout and return its redirect artifact.
    ///
    /// This is the only suspension point in checkout initiation; transport
    /// failures surface as `Gateway` errors and the caller resolves the
    /// pending pair.
    async fn initiate_checkout(&self, ctx: CheckoutContext<'_>) -> BillingResult<CheckoutRedirect>;
}
