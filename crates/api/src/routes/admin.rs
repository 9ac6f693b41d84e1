//! Admin billing routes
//!
//! Each wraps a core billing operation; the billing layer appends the audit
//! entry. Authentication/authorization for these routes is enforced by the
//! platform's admin middleware, outside this crate.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veridex_billing::{SettlementResult, Subscription, TrialSession};
use veridex_shared::{BillingTerm, PlanType};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualInvoiceBody {
    pub actor_id: Uuid,
    pub organization_id: Uuid,
    pub plan: PlanType,
    pub billing_cadence: Option<BillingTerm>,
    pub duration_days: Option<i64>,
    pub amount_cents: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualInvoiceResponse {
    pub invoice_id: Uuid,
    pub attempt_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
}

/// `POST /admin/billing/invoices`
pub async fn create_manual_invoice(
    State(state): State<AppState>,
    Json(body): Json<ManualInvoiceBody>,
) -> ApiResult<Json<ManualInvoiceResponse>> {
    let outcome = state
        .billing
        .admin
        .create_manual_invoice(
            body.actor_id,
            body.organization_id,
            body.plan,
            body.billing_cadence,
            body.duration_days,
            body.amount_cents,
            body.note,
        )
        .await?;
    Ok(Json(ManualInvoiceResponse {
        invoice_id: outcome.invoice.id,
        attempt_id: outcome.attempt.id,
        amount_cents: outcome.invoice.amount_cents,
        currency: outcome.invoice.currency,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflinePaymentBody {
    pub actor_id: Uuid,
    pub attempt_id: Uuid,
    pub reference: Option<String>,
}

/// `POST /admin/billing/offline-payment`
pub async fn apply_offline_payment(
    State(state): State<AppState>,
    Json(body): Json<OfflinePaymentBody>,
) -> ApiResult<Json<SettlementResult>> {
    let result = state
        .billing
        .admin
        .apply_offline_payment(body.actor_id, body.attempt_id, body.reference)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionBody {
    pub actor_id: Uuid,
    pub organization_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionResponse {
    pub canceled: Option<Subscription>,
}

/// `POST /admin/billing/cancel`
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Json(body): Json<CancelSubscriptionBody>,
) -> ApiResult<Json<CancelSubscriptionResponse>> {
    let canceled = state
        .billing
        .admin
        .cancel_subscription(body.actor_id, body.organization_id, body.reason)
        .await?;
    Ok(Json(CancelSubscriptionResponse { canceled }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundFlagBody {
    pub actor_id: Uuid,
    pub invoice_id: Uuid,
    pub flagged: bool,
    pub reason: Option<String>,
}

/// `POST /admin/billing/refund-flag`
pub async fn flag_refund(
    State(state): State<AppState>,
    Json(body): Json<RefundFlagBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .admin
        .flag_refund(body.actor_id, body.invoice_id, body.flagged, body.reason)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialExtendBody {
    pub actor_id: Uuid,
    pub organization_id: Uuid,
    pub extra_days: i64,
}

/// `POST /admin/billing/trial/extend`
pub async fn extend_trial(
    State(state): State<AppState>,
    Json(body): Json<TrialExtendBody>,
) -> ApiResult<Json<TrialSession>> {
    let trial = state
        .billing
        .admin
        .extend_trial(body.actor_id, body.organization_id, body.extra_days)
        .await?;
    Ok(Json(trial))
}
