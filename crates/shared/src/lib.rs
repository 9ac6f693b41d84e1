//! Shared types for the Veridex platform
//!
//! Plan/term/provider enums and status types used by both the billing core
//! and the API server, plus database pool construction.

pub mod db;
pub mod types;

pub use db::create_pool;
pub use types::{
    AttemptStatus, BillingTerm, InvoiceStatus, PaymentProvider, PlanType, SubscriptionStatus,
    TrialStatus,
};
