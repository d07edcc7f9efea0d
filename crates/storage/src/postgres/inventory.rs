use async_trait::async_trait;
use domain::ProductId;
use sqlx::{PgPool, Row};

use crate::ledger::check_quantity;
use crate::{InventoryError, InventoryLedger, StockLevel};

/// PostgreSQL-backed inventory ledger.
///
/// Every operation is one `UPDATE` whose `WHERE` clause carries the guard;
/// the table's CHECK constraints back it up.
#[derive(Clone)]
pub struct PgInventoryLedger {
    pool: PgPool,
}

impl PgInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs a guarded counter update and explains a zero-row result.
    async fn guarded(
        &self,
        sql: &'static str,
        product_id: &ProductId,
        quantity: u32,
        on_guard_failure: fn(ProductId, u32) -> InventoryError,
    ) -> Result<(), InventoryError> {
        let qty = check_quantity(quantity)?;
        let result = sqlx::query(sql)
            .bind(product_id.as_str())
            .bind(qty)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM inventory WHERE product_id = $1)")
                .bind(product_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(InventoryError::UnknownProduct(product_id.clone()));
        }
        Err(on_guard_failure(product_id.clone(), quantity))
    }
}

fn insufficient_stock(product_id: ProductId, requested: u32) -> InventoryError {
    InventoryError::InsufficientStock {
        product_id,
        requested,
    }
}

fn insufficient_reserved(product_id: ProductId, requested: u32) -> InventoryError {
    InventoryError::InsufficientReserved {
        product_id,
        requested,
    }
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    #[tracing::instrument(skip(self))]
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        self.guarded(
            r#"
            UPDATE inventory
            SET available = available - $2, reserved = reserved + $2, updated_at = NOW()
            WHERE product_id = $1 AND available >= $2
            "#,
            product_id,
            quantity,
            insufficient_stock,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn deduct(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        self.guarded(
            r#"
            UPDATE inventory
            SET reserved = reserved - $2, updated_at = NOW()
            WHERE product_id = $1 AND reserved >= $2
            "#,
            product_id,
            quantity,
            insufficient_reserved,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        self.guarded(
            r#"
            UPDATE inventory
            SET available = available + $2, reserved = reserved - $2, updated_at = NOW()
            WHERE product_id = $1 AND reserved >= $2
            "#,
            product_id,
            quantity,
            insufficient_reserved,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<(), InventoryError> {
        self.guarded(
            r#"
            UPDATE inventory
            SET available = available + $2, updated_at = NOW()
            WHERE product_id = $1
            "#,
            product_id,
            quantity,
            insufficient_stock,
        )
        .await
    }

    async fn stock(&self, product_id: &ProductId) -> Result<StockLevel, InventoryError> {
        let row = sqlx::query("SELECT available, reserved FROM inventory WHERE product_id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| InventoryError::UnknownProduct(product_id.clone()))?;

        Ok(StockLevel {
            product_id: product_id.clone(),
            available: row.try_get("available")?,
            reserved: row.try_get("reserved")?,
        })
    }

    async fn set_available(
        &self,
        product_id: &ProductId,
        available: i64,
    ) -> Result<StockLevel, InventoryError> {
        if available < 0 {
            return Err(InventoryError::InvalidQuantity(available));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO inventory (product_id, available, reserved)
            VALUES ($1, $2, 0)
            ON CONFLICT (product_id) DO UPDATE SET available = EXCLUDED.available, updated_at = NOW()
            RETURNING available, reserved
            "#,
        )
        .bind(product_id.as_str())
        .bind(available)
        .fetch_one(&self.pool)
        .await?;

        Ok(StockLevel {
            product_id: product_id.clone(),
            available: row.try_get("available")?,
            reserved: row.try_get("reserved")?,
        })
    }
}
