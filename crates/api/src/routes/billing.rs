//! Billing routes
//!
//! Checkout initiation, the mock test path, and provider callbacks. The
//! SSLCommerz callbacks always answer with an HTTP redirect because the
//! caller is the end user's browser, never a machine client.

use axum::extract::{Form, Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veridex_billing::webhooks::SslcommerzCallback;
use veridex_billing::{CheckoutRequest, MockSimulation, SettlementResult, WebhookAck};
use veridex_shared::{BillingTerm, PlanType};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub organization_id: Uuid,
    pub plan: PlanType,
    pub billing_cadence: Option<BillingTerm>,
    pub duration_days: Option<i64>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
    pub actor_role: Option<String>,
}

impl CheckoutBody {
    fn into_request(self) -> CheckoutRequest {
        CheckoutRequest {
            organization_id: self.organization_id,
            plan: self.plan,
            term: self.billing_cadence,
            duration_days: self.duration_days,
            amount_cents: self.amount_cents,
            currency: self.currency,
            idempotency_key: self.idempotency_key,
            actor_role: self.actor_role,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub redirect_url: Option<String>,
    pub invoice_id: Uuid,
    pub attempt_id: Uuid,
    pub idempotent: bool,
}

/// `POST /billing/checkout` - self-serve checkout on the configured provider
pub async fn checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<Json<CheckoutResponse>> {
    let outcome = state.billing.checkout.initiate(body.into_request()).await?;
    Ok(Json(CheckoutResponse {
        redirect_url: outcome.redirect_url,
        invoice_id: outcome.invoice.id,
        attempt_id: outcome.attempt.id,
        idempotent: outcome.idempotent,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockCheckoutBody {
    #[serde(flatten)]
    pub checkout: CheckoutBody,
    /// When present the settlement path runs in the same call
    pub simulate: Option<MockSimulation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockCheckoutResponse {
    #[serde(flatten)]
    pub checkout: CheckoutResponse,
    pub settlement: Option<SettlementResult>,
}

/// `POST /billing/mock/checkout` - gateway-fixed to the mock provider
pub async fn mock_checkout(
    State(state): State<AppState>,
    Json(body): Json<MockCheckoutBody>,
) -> ApiResult<Json<MockCheckoutResponse>> {
    let (outcome, settlement) = state
        .billing
        .mock_checkout(body.checkout.into_request(), body.simulate)
        .await?;
    Ok(Json(MockCheckoutResponse {
        checkout: CheckoutResponse {
            redirect_url: outcome.redirect_url,
            invoice_id: outcome.invoice.id,
            attempt_id: outcome.attempt.id,
            idempotent: outcome.idempotent,
        },
        settlement,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockCallbackBody {
    pub attempt_id: Uuid,
    pub outcome: MockSimulation,
    pub reference: Option<String>,
}

/// `POST /billing/mock/callback` - drive a pending mock attempt terminal
pub async fn mock_callback(
    State(state): State<AppState>,
    Json(body): Json<MockCallbackBody>,
) -> ApiResult<Json<SettlementResult>> {
    let result = state
        .billing
        .apply_mock_result(body.attempt_id, body.outcome, body.reference)
        .await?;
    Ok(Json(result))
}

/// `POST /billing/webhook/stripe` - raw body plus signature header
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());
    let ack = state
        .billing
        .webhooks
        .handle_stripe_payload(&body, signature)
        .await?;
    Ok(Json(ack))
}

// SSLCommerz posts form-encoded callbacks but its dashboard test tools use
// GET; both are accepted on each endpoint.

pub async fn sslcommerz_success_get(
    State(state): State<AppState>,
    Query(callback): Query<SslcommerzCallback>,
) -> Redirect {
    Redirect::to(&state.billing.webhooks.handle_sslcommerz_success(callback).await)
}

pub async fn sslcommerz_success_post(
    State(state): State<AppState>,
    Form(callback): Form<SslcommerzCallback>,
) -> Redirect {
    Redirect::to(&state.billing.webhooks.handle_sslcommerz_success(callback).await)
}

pub async fn sslcommerz_fail_get(
    State(state): State<AppState>,
    Query(callback): Query<SslcommerzCallback>,
) -> Redirect {
    Redirect::to(&state.billing.webhooks.handle_sslcommerz_fail(callback).await)
}

pub async fn sslcommerz_fail_post(
    State(state): State<AppState>,
    Form(callback): Form<SslcommerzCallback>,
) -> Redirect {
    Redirect::to(&state.billing.webhooks.handle_sslcommerz_fail(callback).await)
}

pub async fn sslcommerz_cancel_get(
    State(state): State<AppState>,
    Query(callback): Query<SslcommerzCallback>,
) -> Redirect {
    Redirect::to(&state.billing.webhooks.handle_sslcommerz_cancel(callback).await)
}

pub async fn sslcommerz_cancel_post(
    State(state): State<AppState>,
    Form(callback): Form<SslcommerzCallback>,
) -> Redirect {
    Redirect::to(&state.billing.webhooks.handle_sslcommerz_cancel(callback).await)
}
