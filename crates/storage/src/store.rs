//! Order, payment and outbox store contracts.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{OrderId, PaymentId, TaskId};
use domain::{HoldState, NewPayment, Order, OrderStatus, Payment, UserId};
use serde::Serialize;

use crate::{OutboxTask, Result};

/// Default page size of the admin order listing.
pub const DEFAULT_PAGE_LIMIT: u32 = 15;
/// Largest accepted page size of the admin order listing.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Filter and pagination of the admin order listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl OrderFilter {
    /// Creates a filter, clamping `page` to at least 1 and `limit` to
    /// `1..=MAX_PAGE_LIMIT`.
    pub fn new(status: Option<OrderStatus>, page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            status,
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    /// Number of rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

/// One page of orders, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    /// Number of orders matching the filter across all pages.
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Persists orders and owns the order status machine.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order with its items.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Loads an order with its items.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Moves the order from `from` to `to` if it is currently in `from`.
    ///
    /// Returns `false` when the order was in another status. Fails with
    /// `OrderNotFound` for unknown ids.
    async fn transition(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool>;

    /// Moves a `pending_payment` order to `paid` if every line is
    /// `deducted`, checked and applied as one atomic step.
    ///
    /// Returns `false` when the order is in another status or a line holds
    /// anything but deducted stock.
    async fn settle_paid(&self, id: OrderId) -> Result<bool>;

    /// Moves one line's hold from `from` to `to` if it is currently `from`
    /// and the order is in `status`.
    ///
    /// Serialised against `settle_paid`, so a line cannot be claimed away
    /// from an order that has just become paid.
    async fn claim_item_hold(
        &self,
        id: OrderId,
        line: u32,
        from: HoldState,
        to: HoldState,
        status: OrderStatus,
    ) -> Result<bool>;

    /// Moves one line's hold from `from` to `to` if it is currently `from`,
    /// whatever the order status.
    async fn set_item_hold(
        &self,
        id: OrderId,
        line: u32,
        from: HoldState,
        to: HoldState,
    ) -> Result<bool>;

    /// Lists a user's orders, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>>;

    /// Lists orders for the admin view.
    async fn list(&self, filter: OrderFilter) -> Result<OrderPage>;
}

/// Result of an insert-or-return-existing write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert<T> {
    Inserted(T),
    Existing(T),
}

impl<T> Upsert<T> {
    pub fn was_inserted(&self) -> bool {
        matches!(self, Upsert::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Upsert::Inserted(value) | Upsert::Existing(value) => value,
        }
    }
}

/// What recording a gateway capture did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The payment moved to `captured` and a mark-paid task was enqueued.
    Captured { payment: Payment, task: OutboxTask },
    /// The payment had already been captured; nothing changed.
    AlreadyCaptured(Payment),
    /// Another payment of the same order is already captured; nothing changed.
    DuplicateOrderCapture(Payment),
    /// No payment carries this gateway order id.
    UnknownGatewayOrder,
}

/// Persists payment attempts and owns the payment status machine.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts an `initiated` payment, or returns the row already stored
    /// under the same idempotency key.
    ///
    /// Fails with `IdempotencyConflict` if the key belongs to another order.
    async fn create_or_get(&self, payment: NewPayment) -> Result<Upsert<Payment>>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Stores the gateway order id if none is set yet and returns the row as
    /// stored afterwards.
    async fn attach_gateway_order(&self, id: PaymentId, gateway_order_id: &str) -> Result<Payment>;

    /// Moves the payment owning `gateway_order_id` to `captured` unless it is
    /// already captured, enqueuing a `mark_order_paid` task due at
    /// `retry_at` in the same atomic step.
    async fn mark_captured(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<CaptureOutcome>;

    /// Returns the captured payment of an order, if any.
    async fn captured_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Returns payments still `initiated` that were created at or before
    /// `cutoff`, oldest first.
    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<Payment>>;

    /// Moves the payment to `failed` if it is still `initiated`.
    async fn mark_failed(&self, id: PaymentId) -> Result<bool>;
}

/// Durable queue of follow-up tasks.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` due pending tasks.
    ///
    /// Claimed tasks have `attempts` incremented and `next_attempt_at` pushed
    /// to `now + lease`, so no other drainer picks them up meanwhile.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: u32,
    ) -> Result<Vec<OutboxTask>>;

    async fn complete(&self, id: TaskId) -> Result<()>;

    /// Records a failed attempt and schedules the next one.
    async fn reschedule(&self, id: TaskId, error: &str, next_attempt_at: DateTime<Utc>)
    -> Result<()>;

    /// Gives up on a task.
    async fn mark_dead(&self, id: TaskId, error: &str) -> Result<()>;

    async fn get_task(&self, id: TaskId) -> Result<Option<OutboxTask>>;

    /// Lists every task recorded for an order, oldest first.
    async fn tasks_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxTask>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults_and_clamps() {
        let filter = OrderFilter::default();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(filter.offset(), 0);

        let filter = OrderFilter::new(Some(OrderStatus::Paid), Some(0), Some(1000));
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, MAX_PAGE_LIMIT);

        let filter = OrderFilter::new(None, Some(3), Some(20));
        assert_eq!(filter.offset(), 40);
    }

    #[test]
    fn test_upsert_accessors() {
        assert!(Upsert::Inserted(1).was_inserted());
        assert!(!Upsert::Existing(1).was_inserted());
        assert_eq!(Upsert::Existing(7).into_inner(), 7);
    }
}
