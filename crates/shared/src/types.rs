//! Core billing enums
//!
//! All enums serialize as lowercase strings, which is also the representation
//! stored in Postgres TEXT columns.

use serde::{Deserialize, Serialize};

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Basic,
    Pro,
    Team,
    Enterprise,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Basic => "basic",
            PlanType::Pro => "pro",
            PlanType::Team => "team",
            PlanType::Enterprise => "enterprise",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "free" => Some(PlanType::Free),
            "basic" => Some(PlanType::Basic),
            "pro" => Some(PlanType::Pro),
            "team" => Some(PlanType::Team),
            "enterprise" => Some(PlanType::Enterprise),
            _ => None,
        }
    }

    /// Fixed-price tiers purchasable without a sales contract
    pub fn is_self_serve(&self) -> bool {
        matches!(self, PlanType::Basic | PlanType::Pro | PlanType::Team)
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanType::Free)
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cadence for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingTerm {
    #[default]
    Monthly,
    Annual,
}

impl BillingTerm {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingTerm::Monthly => "monthly",
            BillingTerm::Annual => "annual",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Some(BillingTerm::Monthly),
            "annual" | "yearly" | "year" => Some(BillingTerm::Annual),
            _ => None,
        }
    }

    /// Default subscription period length for the term
    pub fn default_duration_days(&self) -> i64 {
        match self {
            BillingTerm::Monthly => 30,
            BillingTerm::Annual => 365,
        }
    }
}

impl std::fmt::Display for BillingTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configured payment gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Sslcommerz,
    Mock,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Sslcommerz => "sslcommerz",
            PaymentProvider::Mock => "mock",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stripe" => Some(PaymentProvider::Stripe),
            "sslcommerz" => Some(PaymentProvider::Sslcommerz),
            "mock" => Some(PaymentProvider::Mock),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice lifecycle state
///
/// OPEN invoices are transitioned by the settlement engine only. PAID is
/// immutable, VOID is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(InvoiceStatus::Open),
            "paid" => Some(InvoiceStatus::Paid),
            "void" => Some(InvoiceStatus::Void),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment attempt lifecycle state
///
/// PENDING is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
    Canceled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Canceled => "canceled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttemptStatus::Pending),
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            "canceled" => Some(AttemptStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trial session state
///
/// An ACTIVE trial is marked CONVERTED (never deleted) when a paid
/// subscription activates for the same billing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Active,
    Expired,
    Converted,
}

impl TrialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialStatus::Active => "active",
            TrialStatus::Expired => "expired",
            TrialStatus::Converted => "converted",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TrialStatus::Active),
            "expired" => Some(TrialStatus::Expired),
            "converted" => Some(TrialStatus::Converted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_type_round_trips() {
        for plan in [
            PlanType::Free,
            PlanType::Basic,
            PlanType::Pro,
            PlanType::Team,
            PlanType::Enterprise,
        ] {
            assert_eq!(PlanType::from_str(plan.as_str()), Some(plan));
        }
        assert_eq!(PlanType::from_str("platinum"), None);
    }

    #[test]
    fn self_serve_tiers() {
        assert!(PlanType::Basic.is_self_serve());
        assert!(PlanType::Pro.is_self_serve());
        assert!(PlanType::Team.is_self_serve());
        assert!(!PlanType::Free.is_self_serve());
        assert!(!PlanType::Enterprise.is_self_serve());
    }

    #[test]
    fn billing_term_aliases() {
        assert_eq!(BillingTerm::from_str("yearly"), Some(BillingTerm::Annual));
        assert_eq!(BillingTerm::from_str("month"), Some(BillingTerm::Monthly));
        assert_eq!(BillingTerm::from_str("weekly"), None);
    }

    #[test]
    fn term_durations() {
        assert_eq!(BillingTerm::Monthly.default_duration_days(), 30);
        assert_eq!(BillingTerm::Annual.default_duration_days(), 365);
    }

    #[test]
    fn attempt_terminality() {
        assert!(!AttemptStatus::Pending.is_terminal());
        assert!(AttemptStatus::Success.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
        assert!(AttemptStatus::Canceled.is_terminal());
    }
}
