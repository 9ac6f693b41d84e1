//! Mock gateway
//!
//! Produces a deterministic local redirect with no external I/O. Used for
//! self-serve mock checkout, deterministic tests, and admin-triggered
//! synthetic provisioning; the caller drives the settlement engine directly
//! when a simulate flag is present.

use async_trait::async_trait;
use veridex_shared::PaymentProvider;

use crate::error::BillingResult;

use super::{CheckoutContext, CheckoutRedirect, GatewayAdapter};

pub struct MockGateway {
    app_base_url: String,
}

impl MockGateway {
    pub fn new(app_base_url: &str) -> Self {
        Self {
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mock
    }

    async fn initiate_checkout(&self, ctx: CheckoutContext<'_>) -> BillingResult<CheckoutRedirect> {
        let attempt = ctx.attempt;
        tracing::debug!(
            attempt_id = %attempt.id,
            invoice_id = %ctx.invoice.id,
            "Issued mock checkout redirect"
        );
        Ok(CheckoutRedirect {
            redirect_url: format!("{}/billing/mock/redirect/{}", self.app_base_url, attempt.id),
            external_id: format!("mock_{}", attempt.id.simple()),
        })
    }
}
