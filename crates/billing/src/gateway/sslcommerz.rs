//! SSLCommerz hosted payment page
//!
//! Checkout initiation is a form-encoded POST to the gateway's session
//! endpoint; the response carries a hosted page URL the user is redirected
//! to. Settlement additionally calls the gateway's validation endpoint with
//! the `val_id` from the success callback.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use veridex_shared::PaymentProvider;

use crate::config::SslcommerzConfig;
use crate::error::{BillingError, BillingResult};

use super::{CheckoutContext, CheckoutRedirect, GatewayAdapter};

pub struct SslcommerzGateway {
    config: SslcommerzConfig,
    http: reqwest::Client,
    app_base_url: String,
    session_endpoint: String,
    validation_endpoint: String,
}

/// Session-initiation response. Only the fields settlement and initiation
/// read; the gateway sends many more.
#[derive(Debug, Deserialize)]
struct InitResponse {
    status: Option<String>,
    #[serde(rename = "GatewayPageURL")]
    gateway_page_url: Option<String>,
    sessionkey: Option<String>,
    #[serde(rename = "failedreason")]
    failed_reason: Option<String>,
}

/// Transaction record from the validation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SslcommerzValidation {
    pub status: Option<String>,
    pub tran_id: Option<String>,
    pub val_id: Option<String>,
    /// Decimal string, e.g. "104.00"
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub bank_tran_id: Option<String>,
}

impl SslcommerzValidation {
    /// True when the gateway considers the transaction settled.
    pub fn is_valid(&self) -> bool {
        matches!(self.status.as_deref(), Some("VALID") | Some("VALIDATED"))
    }

    /// Validated amount in cents, when present and well-formed.
    pub fn amount_cents(&self) -> Option<i64> {
        let raw = self.amount.as_deref()?.trim();
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        Some((value * 100.0).round() as i64)
    }
}

impl SslcommerzGateway {
    pub fn new(config: &SslcommerzConfig, app_base_url: &str) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BillingError::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            session_endpoint: config.session_endpoint(),
            validation_endpoint: config.validation_endpoint(),
            config: config.clone(),
            http,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Point the adapter at alternative endpoints (test servers).
    pub fn with_endpoints(mut self, session: String, validation: String) -> Self {
        self.session_endpoint = session;
        self.validation_endpoint = validation;
        self
    }

    /// Look up the gateway's own record of a transaction by `val_id`.
    pub async fn validate(&self, val_id: &str) -> BillingResult<SslcommerzValidation> {
        let response = self
            .http
            .get(&self.validation_endpoint)
            .query(&[
                ("val_id", val_id),
                ("store_id", &self.config.store_id),
                ("store_passwd", &self.config.store_passwd),
                ("format", "json"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BillingError::Gateway(format!(
                "validation endpoint returned {}",
                response.status()
            )));
        }
        let validation: SslcommerzValidation = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("malformed validation response: {e}")))?;
        Ok(validation)
    }
}

#[async_trait]
impl GatewayAdapter for SslcommerzGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Sslcommerz
    }

    async fn initiate_checkout(&self, ctx: CheckoutContext<'_>) -> BillingResult<CheckoutRedirect> {
        let invoice = ctx.invoice;
        let attempt = ctx.attempt;
        let org = ctx.organization;
        let plan = invoice.purpose.plan();

        // Gateway wants a two-decimal amount, not minor units
        let total_amount = format!("{:.2}", invoice.amount_cents as f64 / 100.0);
        let tran_id = attempt.id.to_string();
        let success_url = format!("{}/billing/sslcommerz/success", self.app_base_url);
        let fail_url = format!("{}/billing/sslcommerz/fail", self.app_base_url);
        let cancel_url = format!("{}/billing/sslcommerz/cancel", self.app_base_url);

        let params: Vec<(&str, String)> = vec![
            ("store_id", self.config.store_id.clone()),
            ("store_passwd", self.config.store_passwd.clone()),
            ("total_amount", total_amount),
            ("currency", invoice.currency.clone()),
            ("tran_id", tran_id),
            ("success_url", success_url),
            ("fail_url", fail_url),
            ("cancel_url", cancel_url),
            ("product_name", format!("{plan} plan")),
            ("product_category", "subscription".to_string()),
            ("product_profile", "non-physical-goods".to_string()),
            ("shipping_method", "NO".to_string()),
            ("cus_name", org.name.clone()),
            (
                "cus_email",
                org.email.clone().unwrap_or_else(|| "unknown@invalid".to_string()),
            ),
            (
                "cus_add1",
                org.address.clone().unwrap_or_else(|| "n/a".to_string()),
            ),
            (
                "cus_phone",
                org.phone.clone().unwrap_or_else(|| "n/a".to_string()),
            ),
        ];

        let response = self
            .http
            .post(&self.session_endpoint)
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BillingError::Gateway(format!(
                "session endpoint returned {}",
                response.status()
            )));
        }
        let init: InitResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("malformed session response: {e}")))?;

        // A missing page URL is a hard configuration/transport failure; the
        // pending pair must not be left without a redirect target.
        let redirect_url = match init.gateway_page_url {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(BillingError::Gateway(format!(
                    "no gateway page URL in session response (status: {}, reason: {})",
                    init.status.as_deref().unwrap_or("unknown"),
                    init.failed_reason.as_deref().unwrap_or("none given"),
                )))
            }
        };

        tracing::info!(
            attempt_id = %attempt.id,
            invoice_id = %invoice.id,
            amount_cents = invoice.amount_cents,
            "Created SSLCommerz payment session"
        );

        Ok(CheckoutRedirect {
            redirect_url,
            external_id: init.sessionkey.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::OrganizationRecord;
    use crate::store::{Invoice, InvoicePurpose, PaymentAttempt};
    use uuid::Uuid;
    use veridex_shared::{BillingTerm, PlanType};

    fn test_config() -> SslcommerzConfig {
        SslcommerzConfig {
            store_id: "teststore".to_string(),
            store_passwd: "testpw".to_string(),
            sandbox: true,
            request_timeout_secs: 5,
        }
    }

    fn test_context() -> (OrganizationRecord, Invoice, PaymentAttempt) {
        let org = OrganizationRecord {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            email: Some("billing@acme.test".to_string()),
            address: None,
            phone: None,
            plan_type: PlanType::Free,
            deleted_at: None,
        };
        let invoice = Invoice::new(
            Uuid::new_v4(),
            4900,
            "BDT",
            InvoicePurpose::SelfServeCheckout {
                organization_id: org.id,
                plan: PlanType::Basic,
                term: BillingTerm::Monthly,
                duration_days: 30,
                provider: PaymentProvider::Sslcommerz,
            },
        );
        let attempt = PaymentAttempt::new(&invoice, PaymentProvider::Sslcommerz, None, None);
        (org, invoice, attempt)
    }

    #[tokio::test]
    async fn initiation_extracts_gateway_page_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gwprocess/v4/api.php")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"SUCCESS","sessionkey":"sess123","GatewayPageURL":"https://pay.test/page/sess123"}"#,
            )
            .create_async()
            .await;

        let gateway = SslcommerzGateway::new(&test_config(), "https://app.test")
            .unwrap()
            .with_endpoints(
                format!("{}/gwprocess/v4/api.php", server.url()),
                format!("{}/validator/api/validationserverAPI.php", server.url()),
            );

        let (org, invoice, attempt) = test_context();
        let redirect = gateway
            .initiate_checkout(CheckoutContext {
                organization: &org,
                invoice: &invoice,
                attempt: &attempt,
            })
            .await
            .unwrap();

        assert_eq!(redirect.redirect_url, "https://pay.test/page/sess123");
        assert_eq!(redirect.external_id, "sess123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_page_url_is_a_hard_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/gwprocess/v4/api.php")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"FAILED","failedreason":"store credential invalid"}"#)
            .create_async()
            .await;

        let gateway = SslcommerzGateway::new(&test_config(), "https://app.test")
            .unwrap()
            .with_endpoints(
                format!("{}/gwprocess/v4/api.php", server.url()),
                format!("{}/validator/api/validationserverAPI.php", server.url()),
            );

        let (org, invoice, attempt) = test_context();
        let err = gateway
            .initiate_checkout(CheckoutContext {
                organization: &org,
                invoice: &invoice,
                attempt: &attempt,
            })
            .await;
        assert!(matches!(err, Err(BillingError::Gateway(_))));
    }

    #[tokio::test]
    async fn validation_parses_amount_and_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/validator/api/validationserverAPI.php")
            .match_query(mockito::Matcher::UrlEncoded("val_id".into(), "v1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"VALID","tran_id":"abc","val_id":"v1","amount":"49.00","currency":"BDT"}"#,
            )
            .create_async()
            .await;

        let gateway = SslcommerzGateway::new(&test_config(), "https://app.test")
            .unwrap()
            .with_endpoints(
                format!("{}/gwprocess/v4/api.php", server.url()),
                format!("{}/validator/api/validationserverAPI.php", server.url()),
            );

        let validation = gateway.validate("v1").await.unwrap();
        assert!(validation.is_valid());
        assert_eq!(validation.amount_cents(), Some(4900));
        assert_eq!(validation.currency.as_deref(), Some("BDT"));
    }

    #[test]
    fn malformed_amounts_yield_none() {
        let v = SslcommerzValidation {
            status: Some("VALID".to_string()),
            tran_id: None,
            val_id: None,
            amount: Some("not-a-number".to_string()),
            currency: None,
            bank_tran_id: None,
        };
        assert_eq!(v.amount_cents(), None);

        let v = SslcommerzValidation {
            amount: Some("-5.00".to_string()),
            ..v
        };
        assert_eq!(v.amount_cents(), None);

        let v = SslcommerzValidation {
            amount: None,
            ..v
        };
        assert_eq!(v.amount_cents(), None);
    }
}
