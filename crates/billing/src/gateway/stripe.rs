//! Stripe checkout sessions
//!
//! Pending attempts become payment-mode checkout sessions; the attempt id
//! rides in the session metadata and the success/cancel URLs so webhook
//! deliveries and user redirects both correlate back to it.

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
};
use veridex_shared::PaymentProvider;

use crate::config::StripeGatewayConfig;
use crate::error::{BillingError, BillingResult};

use super::{CheckoutContext, CheckoutRedirect, GatewayAdapter};

pub struct StripeGateway {
    client: stripe::Client,
    app_base_url: String,
}

impl StripeGateway {
    pub fn new(config: &StripeGatewayConfig, app_base_url: &str) -> Self {
        Self {
            client: stripe::Client::new(config.secret_key.clone()),
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn parse_currency(code: &str) -> BillingResult<stripe::Currency> {
        serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
            .map_err(|_| BillingError::Gateway(format!("unsupported currency '{code}'")))
    }
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn initiate_checkout(&self, ctx: CheckoutContext<'_>) -> BillingResult<CheckoutRedirect> {
        let invoice = ctx.invoice;
        let attempt = ctx.attempt;
        let plan = invoice.purpose.plan();
        let term = invoice.purpose.term();

        let success_url = format!(
            "{}/billing/result?status=success&attempt={}",
            self.app_base_url, attempt.id
        );
        let cancel_url = format!(
            "{}/billing/result?status=canceled&attempt={}",
            self.app_base_url, attempt.id
        );

        let mut metadata = HashMap::new();
        metadata.insert("attempt_id".to_string(), attempt.id.to_string());
        metadata.insert("invoice_id".to_string(), invoice.id.to_string());
        metadata.insert(
            "org_id".to_string(),
            invoice.purpose.organization_id().to_string(),
        );
        metadata.insert("plan".to_string(), plan.as_str().to_string());
        metadata.insert("term".to_string(), term.as_str().to_string());

        let line_item = CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Self::parse_currency(&invoice.currency)?,
                unit_amount: Some(invoice.amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: format!("{} plan ({})", plan, term),
                    description: Some(format!(
                        "{} subscription for {}",
                        plan, ctx.organization.name
                    )),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        };

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![line_item]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            customer_email: ctx.organization.email.as_deref(),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params).await?;

        let redirect_url = session.url.clone().ok_or_else(|| {
            BillingError::Gateway("checkout session created without a redirect URL".to_string())
        })?;

        tracing::info!(
            attempt_id = %attempt.id,
            invoice_id = %invoice.id,
            session_id = %session.id,
            amount_cents = invoice.amount_cents,
            "Created Stripe checkout session"
        );

        Ok(CheckoutRedirect {
            redirect_url,
            external_id: session.id.to_string(),
        })
    }
}
