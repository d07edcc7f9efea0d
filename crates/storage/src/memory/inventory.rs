use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::ProductId;
use tokio::sync::RwLock;

use crate::ledger::check_quantity;
use crate::{InventoryError, InventoryLedger, StockLevel};

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    available: i64,
    reserved: i64,
}

/// In-memory inventory ledger.
#[derive(Clone, Default)]
pub struct InMemoryInventoryLedger {
    stock: Arc<RwLock<HashMap<ProductId, Counters>>>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `update` to a product's counters under one write lock.
    async fn apply<F>(&self, product_id: &ProductId, update: F) -> Result<(), InventoryError>
    where
        F: FnOnce(&mut Counters) -> Result<(), InventoryError>,
    {
        let mut stock = self.stock.write().await;
        let counters = stock
            .get_mut(product_id)
            .ok_or_else(|| InventoryError::UnknownProduct(product_id.clone()))?;
        update(counters)
    }
}

fn level(product_id: &ProductId, counters: Counters) -> StockLevel {
    StockLevel {
        product_id: product_id.clone(),
        available: counters.available,
        reserved: counters.reserved,
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        let qty = check_quantity(quantity)?;
        self.apply(product_id, |c| {
            if c.available < qty {
                return Err(InventoryError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                });
            }
            c.available -= qty;
            c.reserved += qty;
            Ok(())
        })
        .await
    }

    async fn deduct(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        let qty = check_quantity(quantity)?;
        self.apply(product_id, |c| {
            if c.reserved < qty {
                return Err(InventoryError::InsufficientReserved {
                    product_id: product_id.clone(),
                    requested: quantity,
                });
            }
            c.reserved -= qty;
            Ok(())
        })
        .await
    }

    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        let qty = check_quantity(quantity)?;
        self.apply(product_id, |c| {
            if c.reserved < qty {
                return Err(InventoryError::InsufficientReserved {
                    product_id: product_id.clone(),
                    requested: quantity,
                });
            }
            c.reserved -= qty;
            c.available += qty;
            Ok(())
        })
        .await
    }

    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        let qty = check_quantity(quantity)?;
        self.apply(product_id, |c| {
            c.available += qty;
            Ok(())
        })
        .await
    }

    async fn stock(&self, product_id: &ProductId) -> Result<StockLevel, InventoryError> {
        let stock = self.stock.read().await;
        stock
            .get(product_id)
            .map(|c| level(product_id, *c))
            .ok_or_else(|| InventoryError::UnknownProduct(product_id.clone()))
    }

    async fn set_available(
        &self,
        product_id: &ProductId,
        available: i64,
    ) -> Result<StockLevel, InventoryError> {
        if available < 0 {
            return Err(InventoryError::InvalidQuantity(available));
        }
        let mut stock = self.stock.write().await;
        let counters = stock.entry(product_id.clone()).or_default();
        counters.available = available;
        Ok(level(product_id, *counters))
    }
}
