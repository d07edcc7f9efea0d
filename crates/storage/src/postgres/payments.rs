use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{OrderId, PaymentId, TaskId};
use domain::{Currency, IdempotencyKey, Money, NewPayment, Payment, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CaptureOutcome, OutboxStore, OutboxTask, PaymentStore, Result, StoreError, Upsert,
};

const PAYMENT_COLUMNS: &str = "id, idempotency_key, order_id, user_id, gateway, gateway_order_id, \
     gateway_payment_id, amount_cents, currency, status, created_at, updated_at";

const TASK_COLUMNS: &str = "id, kind, order_id, payment_id, status, attempts, last_error, \
     next_attempt_at, created_at, updated_at";

/// Name of the partial unique index allowing one captured payment per order.
const ONE_CAPTURE_PER_ORDER: &str = "payments_one_capture_per_order";

/// PostgreSQL-backed payment store and outbox.
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        let key: String = row.try_get("idempotency_key")?;
        let user_id: Option<String> = row.try_get("user_id")?;
        let currency: String = row.try_get("currency")?;
        let status: String = row.try_get("status")?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            idempotency_key: IdempotencyKey::new(key)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: user_id.map(UserId::new).transpose()?,
            gateway: row.try_get("gateway")?,
            gateway_order_id: row.try_get("gateway_order_id")?,
            gateway_payment_id: row.try_get("gateway_payment_id")?,
            amount: Money::from_minor(row.try_get("amount_cents")?),
            currency: Currency::parse(&currency)?,
            status: status.parse()?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn row_to_task(row: &PgRow) -> Result<OutboxTask> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(OutboxTask {
            id: TaskId::from_uuid(row.try_get::<Uuid, _>("id")?),
            kind: kind.parse()?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            payment_id: PaymentId::from_uuid(row.try_get::<Uuid, _>("payment_id")?),
            status: status.parse()?,
            attempts: attempts.max(0) as u32,
            last_error: row.try_get("last_error")?,
            next_attempt_at: row.try_get::<DateTime<Utc>, _>("next_attempt_at")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    async fn find_by_key(&self, key: &IdempotencyKey) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE idempotency_key = $1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create_or_get(&self, payment: NewPayment) -> Result<Upsert<Payment>> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO payments (id, idempotency_key, order_id, user_id, gateway, amount_cents, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'initiated')
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.idempotency_key.as_str())
        .bind(payment.order_id.as_uuid())
        .bind(payment.user_id.as_ref().map(UserId::as_str))
        .bind(&payment.gateway)
        .bind(payment.amount.minor())
        .bind(payment.currency.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(Upsert::Inserted(Self::row_to_payment(&row)?));
        }

        let existing = self
            .find_by_key(&payment.idempotency_key)
            .await?
            .ok_or(StoreError::PaymentNotFound(payment.id))?;
        if existing.order_id != payment.order_id {
            return Err(StoreError::IdempotencyConflict {
                key: payment.idempotency_key.to_string(),
                existing_order: existing.order_id,
            });
        }
        Ok(Upsert::Existing(existing))
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn attach_gateway_order(&self, id: PaymentId, gateway_order_id: &str) -> Result<Payment> {
        sqlx::query(
            r#"
            UPDATE payments SET gateway_order_id = $2, updated_at = NOW()
            WHERE id = $1 AND gateway_order_id IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(gateway_order_id)
        .execute(&self.pool)
        .await?;

        self.get(id).await?.ok_or(StoreError::PaymentNotFound(id))
    }

    async fn mark_captured(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<CaptureOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_order_id = $1 FOR UPDATE"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(CaptureOutcome::UnknownGatewayOrder);
        };
        let payment = Self::row_to_payment(&row)?;
        if payment.is_captured() {
            return Ok(CaptureOutcome::AlreadyCaptured(payment));
        }

        let updated = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = 'captured', gateway_payment_id = $2, updated_at = NOW()
            WHERE id = $1 AND status <> 'captured'
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id.as_uuid())
        .bind(gateway_payment_id)
        .fetch_one(&mut *tx)
        .await;

        let updated = match updated {
            Ok(row) => Self::row_to_payment(&row)?,
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(ONE_CAPTURE_PER_ORDER) =>
            {
                return Ok(CaptureOutcome::DuplicateOrderCapture(payment));
            }
            Err(e) => return Err(e.into()),
        };

        let task = OutboxTask::mark_order_paid(updated.order_id, updated.id, retry_at, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO payment_outbox (id, kind, order_id, payment_id, status, attempts, next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $7)
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(task.kind.as_str())
        .bind(task.order_id.as_uuid())
        .bind(task.payment_id.as_uuid())
        .bind(task.status.as_str())
        .bind(task.next_attempt_at)
        .bind(task.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CaptureOutcome::Captured {
            payment: updated,
            task,
        })
    }

    async fn captured_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 AND status = 'captured'"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = 'initiated' AND created_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn mark_failed(&self, id: PaymentId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'failed', updated_at = NOW()
            WHERE id = $1 AND status = 'initiated'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OutboxStore for PgPaymentStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: u32,
    ) -> Result<Vec<OutboxTask>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE payment_outbox
            SET attempts = attempts + 1, next_attempt_at = $2, updated_at = $1
            WHERE id IN (
                SELECT id FROM payment_outbox
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now + lease)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        sqlx::query("UPDATE payment_outbox SET status = 'done', updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: TaskId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payment_outbox
            SET last_error = $2, next_attempt_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_dead(&self, id: TaskId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payment_outbox
            SET status = 'dead', last_error = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<OutboxTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM payment_outbox WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn tasks_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM payment_outbox WHERE order_id = $1 ORDER BY created_at"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }
}
