//! Application state shared across request handlers.

use crate::config::Config;
use crate::reports::{ReportLog, SchemaRegistry, SuppressionRules};
use crate::web::middleware::client_ip::ProxyTrust;
use crate::web::middleware::rate_limit::{RateLimitState, SharedRateLimitState};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

/// Static text served by `GET /`.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub description: String,
    pub contact: String,
}

#[derive(Clone)]
pub struct AppState {
    pub schemas: Arc<SchemaRegistry>,
    pub report_log: Arc<ReportLog>,
    pub suppression: Arc<SuppressionRules>,
    pub csp_schema: Arc<PathBuf>,
    pub hpkp_schema: Arc<PathBuf>,
    pub service_info: Arc<ServiceInfo>,
    pub proxy_trust: ProxyTrust,
    /// Present when rate limiting is enabled.
    pub rate_limits: Option<SharedRateLimitState>,
}

impl AppState {
    pub fn new(config: &Config, report_log: ReportLog) -> Self {
        Self {
            schemas: Arc::new(SchemaRegistry::new()),
            report_log: Arc::new(report_log),
            suppression: Arc::new(SuppressionRules::new()),
            csp_schema: Arc::new(config.csp_schema_path.clone()),
            hpkp_schema: Arc::new(config.hpkp_schema_path.clone()),
            service_info: Arc::new(ServiceInfo {
                description: config.description.clone(),
                contact: config.contact.clone(),
            }),
            proxy_trust: ProxyTrust {
                cf_connecting_ip: config.trust_cf_connecting_ip,
            },
            rate_limits: config.rate_limit_enabled.then(|| {
                Arc::new(RateLimitState::new(
                    config.rate_limit_burst,
                    config.rate_limit_per_minute,
                ))
            }),
        }
    }

    /// Open the report log and compile both schemas. Any failure is fatal.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let report_log = ReportLog::open(
            &config.report_log_path,
            config.report_log_max_bytes,
            config.report_log_backups,
        )
        .with_context(|| {
            format!(
                "Failed to open report log {}",
                config.report_log_path.display()
            )
        })?;

        let state = Self::new(config, report_log);
        state
            .schemas
            .preload([state.csp_schema.as_path(), state.hpkp_schema.as_path()])
            .context("Failed to load report schemas")?;
        Ok(state)
    }
}
