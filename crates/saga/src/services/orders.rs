//! Orders collaborator used by the payment side of the saga.

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{INTERNAL_KEY_HEADER, error_message, http_client, join};
use crate::config::HttpClientConfig;
use crate::error::{CheckoutError, Result};

/// Whether an idempotent transition changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Applied,
    /// Nothing to do; the record was already in (or past) the target state.
    Unchanged,
}

impl Transition {
    pub fn from_applied(applied: bool) -> Self {
        if applied {
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Body of the internal paid/release/refund endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub order_id: OrderId,
    pub result: Transition,
}

/// Internal operations the payment side needs from the order side.
#[async_trait]
pub trait OrdersApi: Send + Sync {
    /// Reads an order with internal privileges.
    async fn get_order(&self, order_id: OrderId) -> Result<Order>;

    /// Deducts the order's stock and moves it to `paid`.
    async fn mark_paid(&self, order_id: OrderId) -> Result<Transition>;

    /// Returns the order's stock and moves it to `cancelled`.
    async fn release(&self, order_id: OrderId) -> Result<Transition>;
}

/// Orders service client authenticated with the internal key.
#[derive(Debug, Clone)]
pub struct HttpOrdersClient {
    client: reqwest::Client,
    base_url: String,
    internal_key: String,
}

impl HttpOrdersClient {
    pub fn new(
        base_url: impl Into<String>,
        internal_key: impl Into<String>,
        config: &HttpClientConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url.into(),
            internal_key: internal_key.into(),
        })
    }

    async fn post_transition(&self, order_id: OrderId, action: &str) -> Result<Transition> {
        let response = self
            .client
            .post(join(
                &self.base_url,
                &format!("/v1/orders/{order_id}/{action}"),
            ))
            .header(INTERNAL_KEY_HEADER, &self.internal_key)
            .send()
            .await
            .map_err(|e| CheckoutError::Upstream(format!("orders service unreachable: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                let body: TransitionResponse = response.json().await.map_err(|e| {
                    CheckoutError::Upstream(format!("invalid orders response: {e}"))
                })?;
                Ok(body.result)
            }
            StatusCode::NOT_FOUND => Err(CheckoutError::OrderNotFound(order_id)),
            StatusCode::CONFLICT => Err(CheckoutError::Conflict(error_message(response).await)),
            StatusCode::UNAUTHORIZED => Err(CheckoutError::Upstream(
                "orders service rejected the internal key".to_string(),
            )),
            _ => Err(CheckoutError::Upstream(error_message(response).await)),
        }
    }
}

#[async_trait]
impl OrdersApi for HttpOrdersClient {
    #[tracing::instrument(skip(self))]
    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let response = self
            .client
            .get(join(&self.base_url, &format!("/v1/orders/{order_id}")))
            .header(INTERNAL_KEY_HEADER, &self.internal_key)
            .send()
            .await
            .map_err(|e| CheckoutError::Upstream(format!("orders service unreachable: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Order>()
                .await
                .map_err(|e| CheckoutError::Upstream(format!("invalid order response: {e}"))),
            StatusCode::NOT_FOUND => Err(CheckoutError::OrderNotFound(order_id)),
            _ => Err(CheckoutError::Upstream(error_message(response).await)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn mark_paid(&self, order_id: OrderId) -> Result<Transition> {
        self.post_transition(order_id, "paid").await
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, order_id: OrderId) -> Result<Transition> {
        self.post_transition(order_id, "release").await
    }
}
