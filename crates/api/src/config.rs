//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::{Currency, OrderError};
use saga::{DrainerConfig, HttpClientConfig, RazorpayConfig, SweeperConfig};
use thiserror::Error;

/// Errors raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("DEFAULT_CURRENCY is invalid: {0}")]
    InvalidCurrency(#[from] OrderError),
}

/// Server configuration.
///
/// Reads from environment variables:
/// - `HOST` (default `0.0.0.0`), `PORT` (default `3000`), `RUST_LOG` (default `info`)
/// - `DATABASE_URL`: PostgreSQL stores when set, in-memory stores otherwise
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `INTERNAL_SERVICE_KEY`: required shared secret of internal callers
/// - `CATALOG_ADMIN_KEY`: admin secret of the inventory RPC (defaults to the internal key)
/// - `CART_SVC_BASE`, `CATALOG_SVC_BASE`, `ORDERS_SVC_BASE`: remote collaborators;
///   local implementations are used when unset
/// - `RAZORPAY_KEY_ID`, `RAZORPAY_KEY_SECRET`, `RAZORPAY_WEBHOOK_SECRET`,
///   `RAZORPAY_BASE_URL`: the in-memory gateway is used unless both keys are set
/// - `UPSTREAM_TIMEOUT_SECS`, `PAYMENT_TIMEOUT_SECS`, `SWEEP_INTERVAL_SECS`,
///   `SWEEP_BATCH_SIZE`, `OUTBOX_INTERVAL_SECS`, `OUTBOX_BATCH_SIZE`,
///   `OUTBOX_MAX_ATTEMPTS`, `OUTBOX_RETRY_DELAY_SECS`
/// - `DEFAULT_CURRENCY` (default `INR`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub internal_key: String,
    pub admin_key: String,
    pub cart_base_url: Option<String>,
    pub catalog_base_url: Option<String>,
    pub orders_base_url: Option<String>,
    /// Set only when both the key id and key secret are configured.
    pub razorpay: Option<RazorpayConfig>,
    pub http: HttpClientConfig,
    pub sweeper: SweeperConfig,
    pub drainer: DrainerConfig,
    pub default_currency: Currency,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, treating blank values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let internal_key = var("INTERNAL_SERVICE_KEY").ok_or(ConfigError::Missing("INTERNAL_SERVICE_KEY"))?;
        let admin_key = var("CATALOG_ADMIN_KEY").unwrap_or_else(|| internal_key.clone());

        let razorpay = match (var("RAZORPAY_KEY_ID"), var("RAZORPAY_KEY_SECRET")) {
            (Some(key_id), Some(key_secret)) => {
                let defaults = RazorpayConfig::default();
                Some(RazorpayConfig {
                    webhook_secret: var("RAZORPAY_WEBHOOK_SECRET")
                        .unwrap_or_else(|| key_secret.clone()),
                    base_url: var("RAZORPAY_BASE_URL").unwrap_or(defaults.base_url),
                    key_id,
                    key_secret,
                })
            }
            _ => None,
        };

        let sweeper_defaults = SweeperConfig::default();
        let drainer_defaults = DrainerConfig::default();
        let http_defaults = HttpClientConfig::default();

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: number(&var, "PORT", 3000)?,
            log_level: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            database_url: var("DATABASE_URL"),
            database_max_connections: number(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            internal_key,
            admin_key,
            cart_base_url: var("CART_SVC_BASE"),
            catalog_base_url: var("CATALOG_SVC_BASE"),
            orders_base_url: var("ORDERS_SVC_BASE"),
            razorpay,
            http: HttpClientConfig {
                timeout: seconds(&var, "UPSTREAM_TIMEOUT_SECS", http_defaults.timeout)?,
            },
            sweeper: SweeperConfig {
                interval: seconds(&var, "SWEEP_INTERVAL_SECS", sweeper_defaults.interval)?,
                payment_timeout: seconds(
                    &var,
                    "PAYMENT_TIMEOUT_SECS",
                    sweeper_defaults.payment_timeout,
                )?,
                batch_size: number(&var, "SWEEP_BATCH_SIZE", sweeper_defaults.batch_size)?,
            },
            drainer: DrainerConfig {
                interval: seconds(&var, "OUTBOX_INTERVAL_SECS", drainer_defaults.interval)?,
                batch_size: number(&var, "OUTBOX_BATCH_SIZE", drainer_defaults.batch_size)?,
                max_attempts: number(&var, "OUTBOX_MAX_ATTEMPTS", drainer_defaults.max_attempts)?,
                retry_delay: seconds(
                    &var,
                    "OUTBOX_RETRY_DELAY_SECS",
                    drainer_defaults.retry_delay,
                )?,
                lease: drainer_defaults.lease,
            },
            default_currency: match var("DEFAULT_CURRENCY") {
                Some(code) => Currency::parse(&code)?,
                None => Currency::default(),
            },
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn number<F, T>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        None => Ok(default),
    }
}

fn seconds<F>(var: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    number(var, name, default.as_secs()).map(Duration::from_secs)
}
