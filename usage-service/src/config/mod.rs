//! Configuration module for usage-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base_url: String,
    pub secret_key: Secret<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_concurrency: usize,
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 86_400,
            max_concurrency: 8,
            run_on_startup: true,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl UsageConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let scheduler_defaults = SchedulerConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "usage-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            stripe: StripeConfig {
                api_base_url: env::var("STRIPE_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
                secret_key: Secret::new(env::var("STRIPE_SECRET_KEY").unwrap_or_default()),
                timeout_secs: env_or("STRIPE_TIMEOUT_SECS", 10),
            },
            scheduler: SchedulerConfig {
                enabled: env_or("CYCLE_RESET_ENABLED", scheduler_defaults.enabled),
                interval_secs: env_or("CYCLE_RESET_INTERVAL_SECS", scheduler_defaults.interval_secs),
                max_concurrency: env_or(
                    "CYCLE_RESET_MAX_CONCURRENCY",
                    scheduler_defaults.max_concurrency,
                ),
                run_on_startup: env_or(
                    "CYCLE_RESET_RUN_ON_STARTUP",
                    scheduler_defaults.run_on_startup,
                ),
            },
        })
    }
}
