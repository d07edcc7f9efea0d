//! Inventory ledger contract.

use async_trait::async_trait;
use domain::ProductId;
use serde::{Deserialize, Serialize};

use crate::InventoryError;

/// Current counters for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub available: i64,
    pub reserved: i64,
}

/// Per-product `available`/`reserved` counters.
///
/// Each operation checks its guard and adjusts both counters in one atomic
/// step, so concurrent callers can never drive a counter below zero.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Moves `quantity` units from available to reserved.
    ///
    /// Fails with `InsufficientStock` if `available < quantity`.
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError>;

    /// Consumes `quantity` reserved units for a paid order.
    ///
    /// Fails with `InsufficientReserved` if `reserved < quantity`.
    async fn deduct(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError>;

    /// Returns `quantity` reserved units to available.
    ///
    /// Fails with `InsufficientReserved` if `reserved < quantity`.
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError>;

    /// Puts `quantity` previously deducted units back on sale.
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError>;

    /// Reads the counters of a product.
    async fn stock(&self, product_id: &ProductId) -> Result<StockLevel, InventoryError>;

    /// Sets the available count of a product, creating it if needed.
    async fn set_available(
        &self,
        product_id: &ProductId,
        available: i64,
    ) -> Result<StockLevel, InventoryError>;
}

pub(crate) fn check_quantity(quantity: u32) -> Result<i64, InventoryError> {
    if quantity == 0 {
        return Err(InventoryError::InvalidQuantity(0));
    }
    Ok(i64::from(quantity))
}
