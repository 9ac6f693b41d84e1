//! API error mapping
//!
//! Maps the billing error taxonomy onto HTTP statuses. Configuration and
//! internal errors are masked with a generic body; the detail goes to the
//! server log only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use veridex_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Billing(e) => billing_error_response(e),
        };
        (status, Json(body)).into_response()
    }
}

fn billing_error_response(e: &BillingError) -> (StatusCode, serde_json::Value) {
    match e {
        BillingError::InvalidPlan(_)
        | BillingError::AmountMismatch { .. }
        | BillingError::AmountRequired
        | BillingError::Validation(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": "validation_failed", "message": e.to_string() }),
        ),
        BillingError::IdempotencyKeyReuse => (
            StatusCode::CONFLICT,
            json!({ "error": "idempotency_conflict", "message": e.to_string() }),
        ),
        BillingError::ComplianceDenied {
            code,
            enterprise_id,
            action,
            reason,
        } => (
            StatusCode::FORBIDDEN,
            json!({
                "error": "compliance_denied",
                "code": code,
                "enterpriseId": enterprise_id,
                "action": action,
                "reason": reason,
            }),
        ),
        BillingError::NotFound(what) => (
            StatusCode::NOT_FOUND,
            json!({ "error": "not_found", "message": what }),
        ),
        BillingError::WebhookSignatureInvalid => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "signature_invalid", "message": e.to_string() }),
        ),
        // A security event, not a retryable request problem
        BillingError::IntegrityViolation(_) => (
            StatusCode::CONFLICT,
            json!({ "error": "integrity_violation", "message": e.to_string() }),
        ),
        BillingError::ProviderAmountMismatch { .. }
        | BillingError::ProviderCurrencyMismatch { .. }
        | BillingError::AmountValidationFailed(_)
        | BillingError::PlanTypeMissing(_) => (
            StatusCode::CONFLICT,
            json!({ "error": "settlement_rejected", "message": e.to_string() }),
        ),
        // Masked: operators read the log, callers get a generic message
        BillingError::Config(detail) => {
            tracing::error!(detail = %detail, "Billing configuration error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "configuration_error", "message": "billing is not available" }),
            )
        }
        BillingError::Gateway(detail) => {
            tracing::error!(detail = %detail, "Gateway error");
            (
                StatusCode::BAD_GATEWAY,
                json!({ "error": "gateway_error", "message": "payment provider unavailable" }),
            )
        }
        BillingError::Database(detail) | BillingError::Internal(detail) => {
            tracing::error!(detail = %detail, "Internal billing error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal_error", "message": "internal server error" }),
            )
        }
    }
}
