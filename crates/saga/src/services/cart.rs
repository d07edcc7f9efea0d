//! Cart snapshot reader.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{CartSnapshot, SessionId, UserId};
use tokio::sync::RwLock;

use super::{SESSION_ID_HEADER, USER_ID_HEADER, http_client, join};
use crate::config::HttpClientConfig;
use crate::error::{CheckoutError, Result};

/// Whose cart to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartKey {
    User(UserId),
    Session(SessionId),
}

/// Read-only access to priced cart contents.
#[async_trait]
pub trait CartReader: Send + Sync {
    /// Returns the cart for `key`; an unknown key yields an empty cart.
    async fn get_cart(&self, key: &CartKey) -> Result<CartSnapshot>;
}

/// In-memory cart reader for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartReader {
    carts: Arc<RwLock<HashMap<CartKey, CartSnapshot>>>,
}

impl InMemoryCartReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cart stored under `key`.
    pub async fn put(&self, key: CartKey, cart: CartSnapshot) {
        self.carts.write().await.insert(key, cart);
    }
}

#[async_trait]
impl CartReader for InMemoryCartReader {
    async fn get_cart(&self, key: &CartKey) -> Result<CartSnapshot> {
        Ok(self.carts.read().await.get(key).cloned().unwrap_or_default())
    }
}

/// Cart service client: `GET {base}/v1/cart`.
#[derive(Debug, Clone)]
pub struct HttpCartClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCartClient {
    pub fn new(base_url: impl Into<String>, config: &HttpClientConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl CartReader for HttpCartClient {
    #[tracing::instrument(skip(self))]
    async fn get_cart(&self, key: &CartKey) -> Result<CartSnapshot> {
        let request = self.client.get(join(&self.base_url, "/v1/cart"));
        let request = match key {
            CartKey::User(user_id) => request.header(USER_ID_HEADER, user_id.as_str()),
            CartKey::Session(session_id) => request.header(SESSION_ID_HEADER, session_id.as_str()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| CheckoutError::Upstream(format!("cart service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckoutError::Upstream(format!(
                "cart service returned {status}"
            )));
        }

        response
            .json::<CartSnapshot>()
            .await
            .map_err(|e| CheckoutError::Upstream(format!("invalid cart response: {e}")))
    }
}
