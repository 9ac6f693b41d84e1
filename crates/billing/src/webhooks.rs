//! Provider callback handling
//!
//! Stripe-style webhooks are verified, parsed and dispatched into the
//! settlement engine; settlement failures are absorbed into the attempt's
//! terminal state and the provider still receives an acknowledgment, so it
//! is never made to retry a condition this system has already resolved.
//! SSLCommerz callbacks are browser redirects, not a machine API: every
//! outcome resolves to a redirect URL, never an error response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veridex_shared::AttemptStatus;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::SslcommerzGateway;
use crate::integrity::IntegrityGuard;
use crate::settlement::{ProviderCharge, SettlementEngine};

/// Parsed provider webhook event. Only the fields settlement reads.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: CheckoutSessionPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionPayload {
    pub id: Option<String>,
    pub payment_status: Option<String>,
    /// Amount in minor units, as the provider reports it
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Acknowledgment returned to the webhook caller.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    /// Event had no attempt correlation or an unhandled type
    pub ignored: bool,
    pub idempotent: bool,
    pub attempt_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    /// Settlement error absorbed into the attempt's terminal state
    pub error: Option<String>,
}

impl WebhookAck {
    fn ignored() -> Self {
        Self {
            received: true,
            ignored: true,
            idempotent: false,
            attempt_id: None,
            subscription_id: None,
            error: None,
        }
    }
}

/// Callback parameters the hosted payment page posts back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslcommerzCallback {
    pub tran_id: Option<String>,
    pub val_id: Option<String>,
    pub status: Option<String>,
}

fn correlated_attempt(session: &CheckoutSessionPayload) -> Option<Uuid> {
    session
        .metadata
        .get("attempt_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

pub struct WebhookHandler {
    engine: SettlementEngine,
    guard: IntegrityGuard,
    sslcommerz: Option<SslcommerzGateway>,
    app_base_url: String,
}

impl WebhookHandler {
    pub fn new(
        config: &BillingConfig,
        engine: SettlementEngine,
        guard: IntegrityGuard,
    ) -> BillingResult<Self> {
        let sslcommerz = config
            .sslcommerz
            .as_ref()
            .map(|cfg| SslcommerzGateway::new(cfg, &config.app_base_url))
            .transpose()?;
        Ok(Self {
            engine,
            guard,
            sslcommerz,
            app_base_url: config.app_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Verify the raw payload against the signature header and parse it.
    ///
    /// Errors here (bad signature, unparseable body) are the only webhook
    /// failures surfaced to the provider as non-2xx.
    pub fn verify_and_parse(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> BillingResult<StripeEvent> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| BillingError::Validation(format!("unparseable webhook body: {e}")))?;
        self.guard.verify_webhook_signature(&value, signature)?;
        serde_json::from_value(value)
            .map_err(|e| BillingError::Validation(format!("unexpected webhook shape: {e}")))
    }

    /// Verify, parse and dispatch one webhook delivery.
    pub async fn handle_stripe_payload(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> BillingResult<WebhookAck> {
        let event = self.verify_and_parse(payload, signature)?;
        Ok(self.handle_stripe_event(event).await)
    }

    /// Dispatch a verified event into the settlement engine.
    pub async fn handle_stripe_event(&self, event: StripeEvent) -> WebhookAck {
        let session = &event.data.object;
        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let Some(attempt_id) = correlated_attempt(session) else {
                    // Providers retry and send unrelated event types; an
                    // uncorrelated event is acknowledged, not failed.
                    tracing::debug!(
                        event_id = event.id.as_deref().unwrap_or("unknown"),
                        event_type = %event.event_type,
                        "Webhook event has no attempt correlation - ignoring"
                    );
                    return WebhookAck::ignored();
                };
                if session.payment_status.as_deref() != Some("paid") {
                    tracing::info!(
                        attempt_id = %attempt_id,
                        payment_status = session.payment_status.as_deref().unwrap_or("none"),
                        "Checkout completed without payment - awaiting async result"
                    );
                    return WebhookAck::ignored();
                }
                let charge = ProviderCharge {
                    amount_cents: session.amount_total,
                    currency: session.currency.as_ref().map(|c| c.to_uppercase()),
                };
                let reference = session.id.clone().unwrap_or_else(|| attempt_id.to_string());
                self.settle(attempt_id, &reference, Some(charge)).await
            }
            "checkout.session.async_payment_failed" => {
                self.resolve_failure(
                    session,
                    AttemptStatus::Failed,
                    "provider reported async payment failure",
                )
                .await
            }
            "checkout.session.expired" => {
                self.resolve_failure(session, AttemptStatus::Canceled, "checkout session expired")
                    .await
            }
            other => {
                tracing::info!(
                    event_id = event.id.as_deref().unwrap_or("unknown"),
                    event_type = %other,
                    "Received unhandled webhook event type - no handler configured"
                );
                WebhookAck::ignored()
            }
        }
    }

    async fn settle(
        &self,
        attempt_id: Uuid,
        reference: &str,
        charge: Option<ProviderCharge>,
    ) -> WebhookAck {
        match self
            .engine
            .activate_success(attempt_id, reference, charge)
            .await
        {
            Ok(result) => WebhookAck {
                received: true,
                ignored: false,
                idempotent: result.idempotent,
                attempt_id: Some(result.attempt_id),
                subscription_id: result.subscription_id,
                error: None,
            },
            Err(e) => {
                tracing::error!(
                    attempt_id = %attempt_id,
                    error = %e,
                    "Webhook settlement failed - acknowledged with attempt resolved"
                );
                WebhookAck {
                    received: true,
                    ignored: false,
                    idempotent: false,
                    attempt_id: Some(attempt_id),
                    subscription_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn resolve_failure(
        &self,
        session: &CheckoutSessionPayload,
        terminal: AttemptStatus,
        reason: &str,
    ) -> WebhookAck {
        let Some(attempt_id) = correlated_attempt(session) else {
            tracing::debug!("Failure webhook event has no attempt correlation - ignoring");
            return WebhookAck::ignored();
        };
        match self.engine.mark_failed(attempt_id, terminal, reason).await {
            Ok(result) => WebhookAck {
                received: true,
                ignored: false,
                idempotent: result.idempotent,
                attempt_id: Some(result.attempt_id),
                subscription_id: result.subscription_id,
                error: None,
            },
            Err(e) => {
                tracing::error!(
                    attempt_id = %attempt_id,
                    error = %e,
                    "Failed to resolve attempt from webhook"
                );
                WebhookAck {
                    received: true,
                    ignored: false,
                    idempotent: false,
                    attempt_id: Some(attempt_id),
                    subscription_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // SSLCommerz callbacks: the caller is the end user's browser, via the
    // provider. Every path ends in a redirect URL.
    // ------------------------------------------------------------------

    /// Success callback: validate against the gateway's own endpoint, then
    /// settle. Any disagreement resolves the attempt as failed rather than
    /// raising.
    pub async fn handle_sslcommerz_success(&self, callback: SslcommerzCallback) -> String {
        let Some(attempt_id) = callback
            .tran_id
            .as_deref()
            .and_then(|t| Uuid::parse_str(t).ok())
        else {
            tracing::warn!("SSLCommerz success callback without usable tran_id");
            return self.result_redirect("failed", None);
        };

        let Some(gateway) = self.sslcommerz.as_ref() else {
            tracing::error!(
                attempt_id = %attempt_id,
                "SSLCommerz callback received but gateway is not configured"
            );
            let _ = self
                .engine
                .mark_failed(
                    attempt_id,
                    AttemptStatus::Failed,
                    "sslcommerz gateway not configured",
                )
                .await;
            return self.result_redirect("failed", Some(attempt_id));
        };

        let Some(val_id) = callback.val_id.as_deref().filter(|v| !v.is_empty()) else {
            let _ = self
                .engine
                .mark_failed(
                    attempt_id,
                    AttemptStatus::Failed,
                    "success callback missing val_id",
                )
                .await;
            return self.result_redirect("failed", Some(attempt_id));
        };

        let validation = match gateway.validate(val_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    attempt_id = %attempt_id,
                    error = %e,
                    "SSLCommerz validation call failed"
                );
                let _ = self
                    .engine
                    .mark_failed(
                        attempt_id,
                        AttemptStatus::Failed,
                        &format!("validation call failed: {e}"),
                    )
                    .await;
                return self.result_redirect("failed", Some(attempt_id));
            }
        };

        if !validation.is_valid()
            || validation.tran_id.as_deref() != Some(attempt_id.to_string().as_str())
        {
            tracing::error!(
                attempt_id = %attempt_id,
                validation_status = validation.status.as_deref().unwrap_or("none"),
                validation_tran_id = validation.tran_id.as_deref().unwrap_or("none"),
                "SSLCommerz validation disagreement"
            );
            let _ = self
                .engine
                .mark_failed(
                    attempt_id,
                    AttemptStatus::Failed,
                    "provider validation disagreement",
                )
                .await;
            return self.result_redirect("failed", Some(attempt_id));
        }

        // The validator's amount/currency are cross-checked only when
        // present and well-formed; otherwise settlement proceeds on the
        // internal consistency checks alone.
        let charge = ProviderCharge {
            amount_cents: validation.amount_cents(),
            currency: validation
                .currency
                .as_deref()
                .filter(|c| c.len() == 3)
                .map(str::to_uppercase),
        };
        let reference = validation
            .bank_tran_id
            .clone()
            .unwrap_or_else(|| val_id.to_string());

        match self
            .engine
            .activate_success(attempt_id, &reference, Some(charge))
            .await
        {
            Ok(result) => {
                let status = if result.attempt_status == AttemptStatus::Success {
                    "success"
                } else {
                    "failed"
                };
                self.result_redirect(status, Some(attempt_id))
            }
            Err(e) => {
                tracing::error!(
                    attempt_id = %attempt_id,
                    error = %e,
                    "SSLCommerz settlement failed - resolving attempt"
                );
                let _ = self
                    .engine
                    .mark_failed(attempt_id, AttemptStatus::Failed, &e.to_string())
                    .await;
                self.result_redirect("failed", Some(attempt_id))
            }
        }
    }

    /// Fail callback: another terminal-transition input.
    pub async fn handle_sslcommerz_fail(&self, callback: SslcommerzCallback) -> String {
        self.resolve_redirect_callback(callback, AttemptStatus::Failed, "failed")
            .await
    }

    /// Cancel callback: handled identically to fail, with CANCELED status.
    pub async fn handle_sslcommerz_cancel(&self, callback: SslcommerzCallback) -> String {
        self.resolve_redirect_callback(callback, AttemptStatus::Canceled, "canceled")
            .await
    }

    async fn resolve_redirect_callback(
        &self,
        callback: SslcommerzCallback,
        terminal: AttemptStatus,
        status: &str,
    ) -> String {
        let Some(attempt_id) = callback
            .tran_id
            .as_deref()
            .and_then(|t| Uuid::parse_str(t).ok())
        else {
            tracing::warn!(status = %status, "SSLCommerz callback without usable tran_id");
            return self.result_redirect(status, None);
        };
        let reason = format!(
            "provider {status} callback (status: {})",
            callback.status.as_deref().unwrap_or("none")
        );
        if let Err(e) = self.engine.mark_failed(attempt_id, terminal, &reason).await {
            tracing::error!(
                attempt_id = %attempt_id,
                error = %e,
                "Failed to resolve attempt from callback"
            );
        }
        self.result_redirect(status, Some(attempt_id))
    }

    fn result_redirect(&self, status: &str, attempt_id: Option<Uuid>) -> String {
        match attempt_id {
            Some(id) => format!(
                "{}/billing/result?status={}&attempt={}",
                self.app_base_url, status, id
            ),
            None => format!("{}/billing/result?status={}", self.app_base_url, status),
        }
    }
}
