//! Component configuration.
//!
//! Each component takes its own plain config struct at construction; the
//! binary builds them once from the environment.

use std::time::Duration;

/// Reconciliation sweeper settings.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Age after which an `initiated` payment is considered abandoned.
    pub payment_timeout: Duration,
    /// Maximum payments handled per sweep.
    pub batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            payment_timeout: Duration::from_secs(15 * 60),
            batch_size: 100,
        }
    }
}

/// Outbox drainer settings.
#[derive(Debug, Clone)]
pub struct DrainerConfig {
    pub interval: Duration,
    pub batch_size: u32,
    /// Attempts after which a task is dead-lettered.
    pub max_attempts: u32,
    /// Delay before a failed task is retried.
    pub retry_delay: Duration,
    /// How long a claimed task stays invisible to other drainers.
    pub lease: Duration,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 20,
            max_attempts: 10,
            retry_delay: Duration::from_secs(30),
            lease: Duration::from_secs(60),
        }
    }
}

/// Settings shared by the outbound HTTP clients.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-call timeout. Calls are never retried.
    pub timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Razorpay credentials.
#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    /// Secret used to sign webhooks; Razorpay defaults it to the key secret.
    pub webhook_secret: String,
    pub base_url: String,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.razorpay.com".to_string(),
        }
    }
}

/// Converts a std duration for timestamp arithmetic, capped at a century.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    let cap = chrono::Duration::days(36_500);
    chrono::Duration::from_std(duration).map_or(cap, |d| d.min(cap))
}
