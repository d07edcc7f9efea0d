//! Payment gateway adapters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use domain::{Currency, Money};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{error_message, http_client, join};
use crate::config::{HttpClientConfig, RazorpayConfig};
use crate::error::{CheckoutError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A third-party payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name stored on every payment created through this gateway.
    fn name(&self) -> &str;

    /// Opens a remote order and returns the gateway's order id.
    async fn create_remote_order(
        &self,
        amount: Money,
        currency: &Currency,
        receipt: &str,
    ) -> Result<String>;

    /// Checks a webhook signature against the raw request body.
    fn verify_signature(&self, body: &[u8], signature: &str) -> bool;
}

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex HMAC-SHA256 signature.
fn verify_hex_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(received) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&received).is_ok()
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
}

/// Razorpay Orders API adapter.
#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    config: Arc<RazorpayConfig>,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig, http: &HttpClientConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(http)?,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &str {
        "razorpay"
    }

    #[tracing::instrument(skip(self, currency), fields(currency = %currency))]
    async fn create_remote_order(
        &self,
        amount: Money,
        currency: &Currency,
        receipt: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(join(&self.config.base_url, "/v1/orders"))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&CreateOrderRequest {
                amount: amount.minor(),
                currency: currency.as_str(),
                receipt,
            })
            .send()
            .await
            .map_err(|e| CheckoutError::Gateway(format!("razorpay unreachable: {e}")))?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(CheckoutError::Gateway(format!(
                "razorpay rejected order: {message}"
            )));
        }

        let body: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| CheckoutError::Gateway(format!("invalid razorpay response: {e}")))?;
        if body.id.is_empty() {
            return Err(CheckoutError::Gateway(
                "razorpay returned an empty order id".to_string(),
            ));
        }
        Ok(body.id)
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        verify_hex_signature(self.config.webhook_secret.as_bytes(), body, signature)
    }
}

/// Local gateway that issues order ids without a network call.
///
/// Webhooks are signed with the same HMAC scheme as Razorpay, so tests and
/// local runs exercise the real verification path.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    secret: Arc<Vec<u8>>,
    created: Arc<AtomicU64>,
    fail: Arc<AtomicBool>,
}

impl InMemoryGateway {
    pub fn new(webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Arc::new(webhook_secret.into()),
            created: Arc::new(AtomicU64::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signs a webhook body the way the gateway would.
    pub fn sign(&self, body: &[u8]) -> String {
        sign(&self.secret, body)
    }

    /// Makes subsequent `create_remote_order` calls fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of remote orders created so far.
    pub fn orders_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_remote_order(
        &self,
        _amount: Money,
        _currency: &Currency,
        _receipt: &str,
    ) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CheckoutError::Gateway("gateway unavailable".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("order_{}", uuid::Uuid::new_v4().simple()))
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        verify_hex_signature(&self.secret, body, signature)
    }
}
