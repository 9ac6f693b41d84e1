//! Billing configuration
//!
//! The configured provider is resolved once at startup and injected into the
//! services that need it. Credential presence and flag syntax are validated
//! eagerly so misconfiguration fails the process, not the first checkout.

use veridex_shared::PaymentProvider;

use crate::error::{BillingError, BillingResult};

/// Stripe gateway settings
#[derive(Debug, Clone)]
pub struct StripeGatewayConfig {
    pub secret_key: String,
    /// Webhook signing secret. When absent, webhook signature verification
    /// runs in placeholder mode and accepts every payload.
    pub webhook_secret: Option<String>,
}

/// SSLCommerz gateway settings
#[derive(Debug, Clone)]
pub struct SslcommerzConfig {
    pub store_id: String,
    pub store_passwd: String,
    pub sandbox: bool,
    /// Bound on outbound gateway calls; a timeout fails initiation cleanly.
    pub request_timeout_secs: u64,
}

impl SslcommerzConfig {
    /// Hosted-checkout initialization endpoint
    pub fn session_endpoint(&self) -> String {
        format!("{}/gwprocess/v4/api.php", self.gateway_host())
    }

    /// Transaction validation endpoint
    pub fn validation_endpoint(&self) -> String {
        format!("{}/validator/api/validationserverAPI.php", self.gateway_host())
    }

    fn gateway_host(&self) -> &'static str {
        if self.sandbox {
            "https://sandbox.sslcommerz.com"
        } else {
            "https://securepay.sslcommerz.com"
        }
    }
}

/// Top-level billing configuration, constructed explicitly and passed into
/// `BillingService` at startup.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Process-wide configured provider for real checkouts
    pub provider: PaymentProvider,
    pub stripe: Option<StripeGatewayConfig>,
    pub sslcommerz: Option<SslcommerzConfig>,
    /// Base URL the platform is served from; redirect/callback URLs are
    /// derived from it.
    pub app_base_url: String,
}

impl BillingConfig {
    /// Load from environment variables.
    ///
    /// `PAYMENT_PROVIDER` selects the gateway (`stripe`, `sslcommerz`,
    /// `mock`); the selected gateway's credentials must be present.
    pub fn from_env() -> BillingResult<Self> {
        let provider_raw =
            std::env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "mock".to_string());
        let provider = PaymentProvider::from_str(&provider_raw).ok_or_else(|| {
            BillingError::Config(format!("unknown PAYMENT_PROVIDER '{provider_raw}'"))
        })?;

        let app_base_url = std::env::var("APP_BASE_URL")
            .map_err(|_| BillingError::Config("APP_BASE_URL is not set".to_string()))?;

        let stripe = match std::env::var("STRIPE_SECRET_KEY") {
            Ok(secret_key) if !secret_key.is_empty() => Some(StripeGatewayConfig {
                secret_key,
                webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty()),
            }),
            _ => None,
        };

        let sslcommerz = match std::env::var("SSLCOMMERZ_STORE_ID") {
            Ok(store_id) if !store_id.is_empty() => {
                let store_passwd = std::env::var("SSLCOMMERZ_STORE_PASSWD").map_err(|_| {
                    BillingError::Config("SSLCOMMERZ_STORE_PASSWD is not set".to_string())
                })?;
                let sandbox_raw =
                    std::env::var("SSLCOMMERZ_SANDBOX").unwrap_or_else(|_| "true".to_string());
                let sandbox = parse_bool_token(&sandbox_raw).ok_or_else(|| {
                    BillingError::Config(format!(
                        "SSLCOMMERZ_SANDBOX must be a boolean token, got '{sandbox_raw}'"
                    ))
                })?;
                let request_timeout_secs = std::env::var("SSLCOMMERZ_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30);
                Some(SslcommerzConfig {
                    store_id,
                    store_passwd,
                    sandbox,
                    request_timeout_secs,
                })
            }
            _ => None,
        };

        let config = Self {
            provider,
            stripe,
            sslcommerz,
            app_base_url,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the selected provider's credentials are configured.
    pub fn validate(&self) -> BillingResult<()> {
        match self.provider {
            PaymentProvider::Stripe if self.stripe.is_none() => Err(BillingError::Config(
                "PAYMENT_PROVIDER=stripe but STRIPE_SECRET_KEY is not set".to_string(),
            )),
            PaymentProvider::Sslcommerz if self.sslcommerz.is_none() => Err(BillingError::Config(
                "PAYMENT_PROVIDER=sslcommerz but SSLCOMMERZ_STORE_ID is not set".to_string(),
            )),
            _ => {
                if self.app_base_url.is_empty() {
                    return Err(BillingError::Config("app_base_url is empty".to_string()));
                }
                if let Some(stripe) = &self.stripe {
                    if stripe.webhook_secret.is_none() {
                        tracing::warn!(
                            "No Stripe webhook secret configured - signature verification \
                             runs in placeholder mode"
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Webhook signing secret for the configured Stripe gateway, if any
    pub fn stripe_webhook_secret(&self) -> Option<&str> {
        self.stripe
            .as_ref()
            .and_then(|s| s.webhook_secret.as_deref())
    }
}

/// Accept the usual boolean spellings, reject everything else.
fn parse_bool_token(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(provider: PaymentProvider) -> BillingConfig {
        BillingConfig {
            provider,
            stripe: None,
            sslcommerz: None,
            app_base_url: "https://app.veridex.test".to_string(),
        }
    }

    #[test]
    fn bool_tokens() {
        assert_eq!(parse_bool_token("true"), Some(true));
        assert_eq!(parse_bool_token("0"), Some(false));
        assert_eq!(parse_bool_token("YES"), Some(true));
        assert_eq!(parse_bool_token(" off "), Some(false));
        assert_eq!(parse_bool_token("sandbox"), None);
        assert_eq!(parse_bool_token(""), None);
    }

    #[test]
    fn mock_provider_needs_no_credentials() {
        assert!(base_config(PaymentProvider::Mock).validate().is_ok());
    }

    #[test]
    fn stripe_provider_requires_secret_key() {
        let err = base_config(PaymentProvider::Stripe).validate();
        assert!(matches!(err, Err(BillingError::Config(_))));
    }

    #[test]
    fn sslcommerz_provider_requires_store() {
        let err = base_config(PaymentProvider::Sslcommerz).validate();
        assert!(matches!(err, Err(BillingError::Config(_))));
    }

    #[test]
    fn sslcommerz_endpoints_follow_sandbox_flag() {
        let cfg = SslcommerzConfig {
            store_id: "store".into(),
            store_passwd: "pw".into(),
            sandbox: true,
            request_timeout_secs: 30,
        };
        assert!(cfg.session_endpoint().starts_with("https://sandbox."));
        let live = SslcommerzConfig { sandbox: false, ..cfg };
        assert!(live.validation_endpoint().starts_with("https://securepay."));
    }
}
