//! HTTP routes

pub mod admin;
pub mod billing;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Self-serve checkout
        .route("/billing/checkout", post(billing::checkout))
        // Test/admin mock path
        .route("/billing/mock/checkout", post(billing::mock_checkout))
        .route("/billing/mock/callback", post(billing::mock_callback))
        // Provider callbacks
        .route("/billing/webhook/stripe", post(billing::stripe_webhook))
        .route(
            "/billing/sslcommerz/success",
            get(billing::sslcommerz_success_get).post(billing::sslcommerz_success_post),
        )
        .route(
            "/billing/sslcommerz/fail",
            get(billing::sslcommerz_fail_get).post(billing::sslcommerz_fail_post),
        )
        .route(
            "/billing/sslcommerz/cancel",
            get(billing::sslcommerz_cancel_get).post(billing::sslcommerz_cancel_post),
        )
        // Admin surface
        .route("/admin/billing/invoices", post(admin::create_manual_invoice))
        .route(
            "/admin/billing/offline-payment",
            post(admin::apply_offline_payment),
        )
        .route("/admin/billing/cancel", post(admin::cancel_subscription))
        .route("/admin/billing/refund-flag", post(admin::flag_refund))
        .route("/admin/billing/trial/extend", post(admin::extend_trial))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
