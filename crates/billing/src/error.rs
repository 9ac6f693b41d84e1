//! Billing error types

use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the billing core.
///
/// The variants map onto distinct caller outcomes: configuration problems
/// fail fast (and are masked for non-operator callers), validation and
/// idempotency conflicts are 4xx material, integrity violations are security
/// events, gateway failures resolve the affected attempt rather than bubbling
/// to end users.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Missing/invalid credentials or provider settings. Fail fast.
    #[error("billing configuration error: {0}")]
    Config(String),

    /// Plan cannot be checked out (e.g. FREE has no checkout flow)
    #[error("invalid plan for checkout: {0}")]
    InvalidPlan(String),

    /// Caller-supplied amount disagrees with the fixed tier price
    #[error("amount mismatch: expected {expected} cents, caller supplied {supplied}")]
    AmountMismatch { expected: i64, supplied: i64 },

    /// Enterprise checkout requires a negotiated amount
    #[error("amount required for enterprise checkout")]
    AmountRequired,

    /// Malformed request field
    #[error("validation failed: {0}")]
    Validation(String),

    /// Idempotency key reused for a different logical request
    #[error("idempotency key reused with a different request payload")]
    IdempotencyKeyReuse,

    /// Stored invoice fields no longer match the integrity digest
    #[error("invoice integrity violation: {0}")]
    IntegrityViolation(String),

    /// Attempt and invoice disagree on amount/currency (internal breach)
    #[error("attempt/invoice amount validation failed for attempt {0}")]
    AmountValidationFailed(Uuid),

    /// Provider confirmed a different amount than was requested
    #[error("provider amount mismatch: attempt has {expected} cents, provider reported {reported}")]
    ProviderAmountMismatch { expected: i64, reported: i64 },

    /// Provider confirmed a different currency than was requested
    #[error("provider currency mismatch: attempt has {expected}, provider reported {reported}")]
    ProviderCurrencyMismatch { expected: String, reported: String },

    /// Invoice reached settlement without plan provenance
    #[error("invoice {0} has no plan type in its metadata")]
    PlanTypeMissing(Uuid),

    /// Webhook signature did not verify
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Provider transport or response-shape failure
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Enterprise compliance gate denied the action
    #[error("compliance denied for enterprise {enterprise_id}: {reason}")]
    ComplianceDenied {
        code: String,
        enterprise_id: Uuid,
        action: String,
        reason: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal billing error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Gateway(format!("stripe: {e}"))
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BillingError::Gateway(format!("gateway request timed out: {e}"))
        } else {
            BillingError::Gateway(e.to_string())
        }
    }
}

impl BillingError {
    /// True for errors a caller can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidPlan(_)
                | BillingError::AmountMismatch { .. }
                | BillingError::AmountRequired
                | BillingError::Validation(_)
                | BillingError::IdempotencyKeyReuse
                | BillingError::ComplianceDenied { .. }
                | BillingError::NotFound(_)
        )
    }
}
