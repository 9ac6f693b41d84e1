//! Plan pricing resolution
//!
//! Pure functions mapping (plan, billing term, optional caller amount) to a
//! validated integer amount in minor currency units. Self-serve tiers price
//! from a fixed table; enterprise plans carry a negotiated amount.

use veridex_shared::{BillingTerm, PlanType};

use crate::error::{BillingError, BillingResult};

/// Settlement currency for all self-serve plans
pub const DEFAULT_CURRENCY: &str = "USD";

/// Annual billing pays 12 months minus a 10% discount
const ANNUAL_DISCOUNT: f64 = 0.9;

/// Resolved pricing for one checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPrice {
    pub amount_cents: i64,
    pub term: BillingTerm,
    pub duration_days: i64,
}

/// Monthly base price in cents for self-serve tiers
pub fn monthly_base_price_cents(plan: PlanType) -> Option<i64> {
    match plan {
        PlanType::Basic => Some(4_900),
        PlanType::Pro => Some(9_900),
        PlanType::Team => Some(19_900),
        PlanType::Free | PlanType::Enterprise => None,
    }
}

/// Resolve the charge amount for a plan selection.
///
/// Self-serve plans are table-priced; a caller-supplied amount must match
/// exactly or the request fails with `AmountMismatch`. Enterprise plans
/// require a positive caller amount (floored to an integer >= 1). FREE has
/// no checkout flow.
pub fn resolve_amount(
    plan: PlanType,
    term: BillingTerm,
    caller_amount_cents: Option<i64>,
) -> BillingResult<i64> {
    match plan {
        PlanType::Free => Err(BillingError::InvalidPlan(
            "free plan has no checkout flow".to_string(),
        )),
        PlanType::Enterprise => {
            let amount = caller_amount_cents.ok_or(BillingError::AmountRequired)?;
            if amount <= 0 {
                return Err(BillingError::AmountRequired);
            }
            Ok(amount.max(1))
        }
        _ => {
            // Self-serve tier: fixed table price
            let monthly = monthly_base_price_cents(plan).ok_or_else(|| {
                BillingError::InvalidPlan(format!("no price table entry for {plan}"))
            })?;
            let expected = match term {
                BillingTerm::Monthly => monthly,
                BillingTerm::Annual => annual_price_cents(monthly),
            };
            if let Some(supplied) = caller_amount_cents {
                if supplied != expected {
                    return Err(BillingError::AmountMismatch { expected, supplied });
                }
            }
            Ok(expected)
        }
    }
}

/// Annual price: `round(monthly * 12 * 0.9)`
pub fn annual_price_cents(monthly_cents: i64) -> i64 {
    (monthly_cents as f64 * 12.0 * ANNUAL_DISCOUNT).round() as i64
}

/// Infer a billing term from a duration-in-days hint.
///
/// Long-period invoices read as annual, month-scale ones as monthly, and
/// anything shorter stays unresolved (the checkout factory falls back to
/// MONTHLY).
pub fn infer_term_from_duration(duration_days: i64) -> Option<BillingTerm> {
    if duration_days >= 300 {
        Some(BillingTerm::Annual)
    } else if duration_days >= 20 {
        Some(BillingTerm::Monthly)
    } else {
        None
    }
}

/// Resolve term + duration + amount in one step.
///
/// `term` wins when supplied; otherwise the duration hint is consulted and
/// MONTHLY is the final fallback. The subscription duration follows the
/// resolved term unless an explicit override is supplied.
pub fn resolve_price(
    plan: PlanType,
    term: Option<BillingTerm>,
    duration_hint_days: Option<i64>,
    duration_override_days: Option<i64>,
    caller_amount_cents: Option<i64>,
) -> BillingResult<ResolvedPrice> {
    let term = term
        .or_else(|| duration_hint_days.and_then(infer_term_from_duration))
        .unwrap_or_default();
    let duration_days = duration_override_days.unwrap_or_else(|| term.default_duration_days());
    if duration_days <= 0 {
        return Err(BillingError::Validation(format!(
            "duration must be positive, got {duration_days}"
        )));
    }
    let amount_cents = resolve_amount(plan, term, caller_amount_cents)?;
    Ok(ResolvedPrice {
        amount_cents,
        term,
        duration_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_has_no_checkout() {
        assert!(matches!(
            resolve_amount(PlanType::Free, BillingTerm::Monthly, None),
            Err(BillingError::InvalidPlan(_))
        ));
    }

    #[test]
    fn monthly_table_prices() {
        assert_eq!(
            resolve_amount(PlanType::Basic, BillingTerm::Monthly, None).unwrap(),
            4_900
        );
        assert_eq!(
            resolve_amount(PlanType::Pro, BillingTerm::Monthly, None).unwrap(),
            9_900
        );
        assert_eq!(
            resolve_amount(PlanType::Team, BillingTerm::Monthly, None).unwrap(),
            19_900
        );
    }

    #[test]
    fn pro_annual_is_106920() {
        // round(9900 * 12 * 0.9)
        assert_eq!(
            resolve_amount(PlanType::Pro, BillingTerm::Annual, None).unwrap(),
            106_920
        );
        // Caller supplying exactly the computed value is accepted
        assert_eq!(
            resolve_amount(PlanType::Pro, BillingTerm::Annual, Some(106_920)).unwrap(),
            106_920
        );
    }

    #[test]
    fn self_serve_amount_mismatch_rejected() {
        let err = resolve_amount(PlanType::Pro, BillingTerm::Annual, Some(100_000));
        match err {
            Err(BillingError::AmountMismatch { expected, supplied }) => {
                assert_eq!(expected, 106_920);
                assert_eq!(supplied, 100_000);
            }
            other => panic!("expected AmountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn enterprise_requires_positive_amount() {
        assert!(matches!(
            resolve_amount(PlanType::Enterprise, BillingTerm::Annual, None),
            Err(BillingError::AmountRequired)
        ));
        assert!(matches!(
            resolve_amount(PlanType::Enterprise, BillingTerm::Annual, Some(0)),
            Err(BillingError::AmountRequired)
        ));
        assert_eq!(
            resolve_amount(PlanType::Enterprise, BillingTerm::Annual, Some(250_000)).unwrap(),
            250_000
        );
    }

    #[test]
    fn term_inference_from_duration() {
        assert_eq!(infer_term_from_duration(365), Some(BillingTerm::Annual));
        assert_eq!(infer_term_from_duration(300), Some(BillingTerm::Annual));
        assert_eq!(infer_term_from_duration(299), Some(BillingTerm::Monthly));
        assert_eq!(infer_term_from_duration(30), Some(BillingTerm::Monthly));
        assert_eq!(infer_term_from_duration(20), Some(BillingTerm::Monthly));
        assert_eq!(infer_term_from_duration(19), None);
        assert_eq!(infer_term_from_duration(0), None);
    }

    #[test]
    fn resolve_price_defaults_and_overrides() {
        // No term, no usable hint: monthly default, 30 days
        let p = resolve_price(PlanType::Basic, None, Some(5), None, None).unwrap();
        assert_eq!(p.term, BillingTerm::Monthly);
        assert_eq!(p.duration_days, 30);
        assert_eq!(p.amount_cents, 4_900);

        // Hint resolves annual
        let p = resolve_price(PlanType::Basic, None, Some(365), None, None).unwrap();
        assert_eq!(p.term, BillingTerm::Annual);
        assert_eq!(p.duration_days, 365);

        // Explicit duration override wins
        let p =
            resolve_price(PlanType::Basic, Some(BillingTerm::Monthly), None, Some(45), None)
                .unwrap();
        assert_eq!(p.duration_days, 45);

        // Non-positive override rejected
        assert!(resolve_price(PlanType::Basic, None, None, Some(0), None).is_err());
    }
}
