//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use veridex_billing::external::AllowAllCompliance;
use veridex_billing::{BillingService, PgStore};

use crate::config::Config;
use crate::directory::{PgAuditLog, PgDirectory};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(PgStore::new(pool.clone()));
        let directory = Arc::new(PgDirectory::new(pool.clone()));
        let audit = Arc::new(PgAuditLog::new(pool.clone()));

        let billing = BillingService::new(
            config.billing.clone(),
            store,
            directory,
            audit,
            Arc::new(AllowAllCompliance),
        )?;
        tracing::info!(
            provider = %config.billing.provider,
            "Billing service initialized"
        );

        Ok(Self {
            pool,
            config,
            billing: Arc::new(billing),
        })
    }
}
