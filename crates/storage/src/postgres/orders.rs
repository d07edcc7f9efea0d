use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{
    Currency, HoldState, Money, Order, OrderItem, OrderParts, OrderStatus, ProductId, UserId,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{OrderFilter, OrderPage, OrderStore, Result, StoreError};

const ORDER_COLUMNS: &str =
    "id, user_id, status, currency, total_amount_cents, created_at, updated_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_parts(row: &PgRow) -> Result<OrderParts> {
        let user_id: Option<String> = row.try_get("user_id")?;
        let status: String = row.try_get("status")?;
        let currency: String = row.try_get("currency")?;

        Ok(OrderParts {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: user_id.map(UserId::new).transpose()?,
            status: status.parse()?,
            currency: Currency::parse(&currency)?,
            total_amount: Money::from_minor(row.try_get("total_amount_cents")?),
            items: Vec::new(),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<(Uuid, OrderItem)> {
        let line: i32 = row.try_get("line")?;
        let quantity: i32 = row.try_get("quantity")?;
        let hold: String = row.try_get("hold")?;

        let item = OrderItem {
            line: u32::try_from(line)
                .map_err(|_| StoreError::Corrupt(format!("order line {line}")))?,
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::Corrupt(format!("item quantity {quantity}")))?,
            unit_price: Money::from_minor(row.try_get("unit_price_cents")?),
            hold: hold.parse()?,
        };
        Ok((row.try_get("order_id")?, item))
    }

    /// Locks the order row for the rest of the transaction and returns its
    /// status.
    async fn lock_status(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: OrderId,
    ) -> Result<OrderStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        match status {
            Some(status) => Ok(status.parse()?),
            None => Err(StoreError::OrderNotFound(id)),
        }
    }

    /// Loads the items of the given orders and assembles them.
    async fn assemble(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut parts = rows
            .iter()
            .map(Self::row_to_parts)
            .collect::<Result<Vec<_>>>()?;
        if parts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = parts.iter().map(|p| p.id.as_uuid()).collect();
        let item_rows = sqlx::query(
            r#"
            SELECT order_id, line, product_id, quantity, unit_price_cents, hold
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &item_rows {
            let (order_id, item) = Self::row_to_item(row)?;
            items.entry(order_id).or_default().push(item);
        }

        for part in &mut parts {
            part.items = items.remove(&part.id.as_uuid()).unwrap_or_default();
        }
        Ok(parts.into_iter().map(Order::from_parts).collect())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, currency, total_amount_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().map(UserId::as_str))
        .bind(order.status().as_str())
        .bind(order.currency().as_str())
        .bind(order.total_amount().minor())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_pkey")
            {
                return StoreError::DuplicateOrder(order.id());
            }
            StoreError::Database(e)
        })?;

        for item in order.items() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line, product_id, quantity, unit_price_cents, hold)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(item.line as i32)
            .bind(item.product_id.as_str())
            .bind(item.quantity as i32)
            .bind(item.unit_price.minor())
            .bind(item.hold.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        Ok(self.assemble(rows).await?.into_iter().next())
    }

    async fn transition(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        from.ensure_transition(to)?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(StoreError::OrderNotFound(id));
        }
        Ok(false)
    }

    async fn settle_paid(&self, id: OrderId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let status = Self::lock_status(&mut tx, id).await?;
        if status != OrderStatus::PendingPayment {
            return Ok(false);
        }

        let undeducted: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM order_items WHERE order_id = $1 AND hold <> $2)",
        )
        .bind(id.as_uuid())
        .bind(HoldState::Deducted.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if undeducted {
            return Ok(false);
        }

        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(OrderStatus::Paid.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn claim_item_hold(
        &self,
        id: OrderId,
        line: u32,
        from: HoldState,
        to: HoldState,
        status: OrderStatus,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if Self::lock_status(&mut tx, id).await? != status {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE order_items SET hold = $4
            WHERE order_id = $1 AND line = $2 AND hold = $3
            "#,
        )
        .bind(id.as_uuid())
        .bind(line as i32)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM order_items WHERE order_id = $1 AND line = $2)",
            )
            .bind(id.as_uuid())
            .bind(line as i32)
            .fetch_one(&mut *tx)
            .await?;
            if !exists {
                return Err(StoreError::OrderNotFound(id));
            }
            return Ok(false);
        }

        sqlx::query("UPDATE orders SET updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn set_item_hold(
        &self,
        id: OrderId,
        line: u32,
        from: HoldState,
        to: HoldState,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_items SET hold = $4
            WHERE order_id = $1 AND line = $2 AND hold = $3
            "#,
        )
        .bind(id.as_uuid())
        .bind(line as i32)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            sqlx::query("UPDATE orders SET updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM order_items WHERE order_id = $1 AND line = $2)",
        )
        .bind(id.as_uuid())
        .bind(line as i32)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Err(StoreError::OrderNotFound(id));
        }
        Ok(false)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.assemble(rows).await
    }

    async fn list(&self, filter: OrderFilter) -> Result<OrderPage> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status)
        .bind(i64::from(filter.limit))
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(OrderPage {
            orders: self.assemble(rows).await?,
            total: total as u64,
            page: filter.page,
            limit: filter.limit,
        })
    }
}
