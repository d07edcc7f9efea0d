//! HTTP client for the catalog's inventory RPC.

use async_trait::async_trait;
use domain::ProductId;
use reqwest::StatusCode;
use serde::Serialize;
use storage::{InventoryError, InventoryLedger, StockLevel};

use super::{ADMIN_KEY_HEADER, error_message, http_client, join};
use crate::config::HttpClientConfig;
use crate::error::Result;

#[derive(Serialize)]
struct QuantityRequest {
    quantity: u32,
}

#[derive(Serialize)]
struct SetAvailableRequest {
    available: i64,
}

#[derive(Debug, Clone, Copy)]
enum LedgerOp {
    Reserve,
    Deduct,
    Release,
    Restock,
}

impl LedgerOp {
    fn path(&self) -> &'static str {
        match self {
            LedgerOp::Reserve => "reserve",
            LedgerOp::Deduct => "deduct",
            LedgerOp::Release => "release",
            LedgerOp::Restock => "restock",
        }
    }
}

/// Inventory ledger living in the catalog service.
///
/// Calls `POST {base}/v1/admin/products/{id}/{op}` with the admin key; a 409
/// answer maps back onto the guard that failed.
#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    client: reqwest::Client,
    base_url: String,
    admin_key: String,
}

impl HttpInventoryClient {
    pub fn new(
        base_url: impl Into<String>,
        admin_key: impl Into<String>,
        config: &HttpClientConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url.into(),
            admin_key: admin_key.into(),
        })
    }

    fn product_url(&self, product_id: &ProductId, suffix: &str) -> String {
        join(
            &self.base_url,
            &format!("/v1/admin/products/{}/{suffix}", product_id.as_str()),
        )
    }

    async fn call(
        &self,
        op: LedgerOp,
        product_id: &ProductId,
        quantity: u32,
    ) -> std::result::Result<(), InventoryError> {
        let response = self
            .client
            .post(self.product_url(product_id, op.path()))
            .header(ADMIN_KEY_HEADER, &self.admin_key)
            .json(&QuantityRequest { quantity })
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(format!("catalog unreachable: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(InventoryError::UnknownProduct(product_id.clone())),
            StatusCode::CONFLICT => Err(match op {
                LedgerOp::Reserve => InventoryError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                },
                _ => InventoryError::InsufficientReserved {
                    product_id: product_id.clone(),
                    requested: quantity,
                },
            }),
            StatusCode::BAD_REQUEST => Err(InventoryError::InvalidQuantity(i64::from(quantity))),
            _ => Err(InventoryError::Unavailable(error_message(response).await)),
        }
    }

    async fn read_level(
        &self,
        product_id: &ProductId,
        response: reqwest::Response,
    ) -> std::result::Result<StockLevel, InventoryError> {
        match response.status() {
            status if status.is_success() => response
                .json::<StockLevel>()
                .await
                .map_err(|e| InventoryError::Unavailable(format!("invalid stock response: {e}"))),
            StatusCode::NOT_FOUND => Err(InventoryError::UnknownProduct(product_id.clone())),
            _ => Err(InventoryError::Unavailable(error_message(response).await)),
        }
    }
}

#[async_trait]
impl InventoryLedger for HttpInventoryClient {
    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> std::result::Result<(), InventoryError> {
        self.call(LedgerOp::Reserve, product_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    async fn deduct(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> std::result::Result<(), InventoryError> {
        self.call(LedgerOp::Deduct, product_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> std::result::Result<(), InventoryError> {
        self.call(LedgerOp::Release, product_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    async fn restock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> std::result::Result<(), InventoryError> {
        self.call(LedgerOp::Restock, product_id, quantity).await
    }

    async fn stock(&self, product_id: &ProductId) -> std::result::Result<StockLevel, InventoryError> {
        let response = self
            .client
            .get(self.product_url(product_id, "stock"))
            .header(ADMIN_KEY_HEADER, &self.admin_key)
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(format!("catalog unreachable: {e}")))?;
        self.read_level(product_id, response).await
    }

    async fn set_available(
        &self,
        product_id: &ProductId,
        available: i64,
    ) -> std::result::Result<StockLevel, InventoryError> {
        let response = self
            .client
            .put(self.product_url(product_id, "stock"))
            .header(ADMIN_KEY_HEADER, &self.admin_key)
            .json(&SetAvailableRequest { available })
            .send()
            .await
            .map_err(|e| InventoryError::Unavailable(format!("catalog unreachable: {e}")))?;

        if response.status() == StatusCode::BAD_REQUEST {
            return Err(InventoryError::InvalidQuantity(available));
        }
        self.read_level(product_id, response).await
    }
}
