//! Invoice integrity digests and webhook signatures
//!
//! An invoice's priced fields are bound to a SHA-256 digest at creation so
//! out-of-band mutation of stored metadata is detected before settlement.
//! Inbound webhook payloads are authenticated with HMAC-SHA256 over the same
//! canonical JSON encoding.

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use veridex_shared::PlanType;

use crate::error::{BillingError, BillingResult};
use crate::store::Invoice;

type HmacSha256 = Hmac<Sha256>;

/// Computes and validates integrity digests.
///
/// Holds the optional webhook signing secret; invoice digests are unkeyed.
#[derive(Debug, Clone, Default)]
pub struct IntegrityGuard {
    webhook_secret: Option<String>,
}

impl IntegrityGuard {
    pub fn new(webhook_secret: Option<String>) -> Self {
        Self { webhook_secret }
    }

    /// Digest binding an invoice's priced fields.
    ///
    /// SHA-256 over the canonical (key-sorted) JSON encoding of the four
    /// fields, hex-encoded. Stored on the invoice at creation.
    pub fn compute_invoice_integrity(
        organization_id: Uuid,
        plan: PlanType,
        amount_cents: i64,
        currency: &str,
    ) -> String {
        let encoded = canonical_json(&json!({
            "organization_id": organization_id.to_string(),
            "plan_type": plan.as_str(),
            "amount_cents": amount_cents,
            "currency": currency,
        }));
        hex::encode(Sha256::digest(encoded.as_bytes()))
    }

    /// Recompute the digest from the invoice's current fields and compare to
    /// the stored one.
    ///
    /// A mismatch means the stored metadata was tampered with or corrupted
    /// between creation and settlement. Callers must void the invoice and
    /// fail the attempt; this is not a retryable condition.
    pub fn validate_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        let organization_id = invoice.purpose.organization_id();
        if organization_id.is_nil() {
            return Err(BillingError::IntegrityViolation(format!(
                "invoice {} has no organization in its metadata",
                invoice.id
            )));
        }
        let computed = Self::compute_invoice_integrity(
            organization_id,
            invoice.purpose.plan(),
            invoice.amount_cents,
            &invoice.currency,
        );
        if computed != invoice.integrity_hash {
            tracing::error!(
                invoice_id = %invoice.id,
                "Invoice integrity hash mismatch - stored metadata does not match digest"
            );
            return Err(BillingError::IntegrityViolation(format!(
                "invoice {} integrity hash mismatch",
                invoice.id
            )));
        }
        Ok(())
    }

    /// Verify an inbound webhook payload.
    ///
    /// With no configured secret this is a no-op success (placeholder mode
    /// for environments without one). Otherwise the expected signature is
    /// HMAC-SHA256 over the canonical JSON encoding of the payload; lengths
    /// are compared before the constant-time byte comparison so inequality
    /// never leaks through timing.
    pub fn verify_webhook_signature(
        &self,
        payload: &Value,
        signature: Option<&str>,
    ) -> BillingResult<()> {
        let Some(secret) = self.webhook_secret.as_deref() else {
            return Ok(());
        };
        let signature = signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let expected = Self::sign_payload(payload, secret)?;
        if expected.len() != signature.len() {
            return Err(BillingError::WebhookSignatureInvalid);
        }
        if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
            Ok(())
        } else {
            Err(BillingError::WebhookSignatureInvalid)
        }
    }

    /// Hex HMAC-SHA256 over the canonical encoding of `payload`.
    pub fn sign_payload(payload: &Value, secret: &str) -> BillingResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::Config("webhook secret is not a usable HMAC key".into()))?;
        mac.update(canonical_json(payload).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Serialize with object keys sorted at every level.
///
/// Rebuilding each map in sorted insertion order gives a stable encoding
/// regardless of how the incoming `Value` was constructed.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: serde_json::Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
