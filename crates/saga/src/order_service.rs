//! Order side of the checkout saga.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{
    Currency, HoldState, Money, Order, OrderItem, OrderStatus, SessionId, UserId,
};
use serde::Serialize;
use storage::{InventoryLedger, OrderFilter, OrderPage, OrderStore};

use crate::error::{CheckoutError, Result};
use crate::services::{CartKey, CartReader, OrdersApi, Transition};

/// Who is asking to see an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    /// A service holding the internal key; sees every order.
    Internal,
    /// An authenticated user; sees only their own orders.
    User(UserId),
    Anonymous,
}

/// Claim attempts per line before a return walk gives up.
const MAX_LINE_ATTEMPTS: usize = 4;

/// Response of a successful prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedOrder {
    pub order_id: OrderId,
    pub status: OrderStatus,
    #[serde(rename = "amount_cents")]
    pub amount: Money,
    pub currency: Currency,
}

/// Prepares orders from carts and drives their compensations.
///
/// Stock moves are tracked per order line: a line's hold is claimed with a
/// guarded update before the ledger call and put back if the call fails, so
/// concurrent mark-paid and release walks never act on the same line twice.
/// Claims only succeed while the order is in the walk's status, and the
/// order only becomes `paid` while every line is deducted.
pub struct OrderService<O: ?Sized, C: ?Sized, L: ?Sized> {
    orders: Arc<O>,
    carts: Arc<C>,
    ledger: Arc<L>,
    default_currency: Currency,
}

impl<O: ?Sized, C: ?Sized, L: ?Sized> Clone for OrderService<O, C, L> {
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            carts: Arc::clone(&self.carts),
            ledger: Arc::clone(&self.ledger),
            default_currency: self.default_currency.clone(),
        }
    }
}

impl<O, C, L> OrderService<O, C, L>
where
    O: OrderStore + ?Sized,
    C: CartReader + ?Sized,
    L: InventoryLedger + ?Sized,
{
    pub fn new(orders: Arc<O>, carts: Arc<C>, ledger: Arc<L>, default_currency: Currency) -> Self {
        Self {
            orders,
            carts,
            ledger,
            default_currency,
        }
    }

    /// Converts the caller's cart into a `pending_payment` order and
    /// reserves stock for every line.
    ///
    /// The user's cart is read first; if it is empty and a session id is
    /// present, the guest cart is used instead. When a reservation fails the
    /// lines already reserved are released and the order is cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn prepare_order(
        &self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> Result<PreparedOrder> {
        let started = std::time::Instant::now();

        let cart = match (&user_id, &session_id) {
            (None, None) => {
                return Err(CheckoutError::InvalidRequest(
                    "X-USER-ID or X-SESSION-ID header is required".to_string(),
                ));
            }
            (Some(user), session) => {
                let cart = self.carts.get_cart(&CartKey::User(user.clone())).await?;
                match session {
                    Some(session) if cart.is_empty() => {
                        self.carts
                            .get_cart(&CartKey::Session(session.clone()))
                            .await?
                    }
                    _ => cart,
                }
            }
            (None, Some(session)) => {
                self.carts
                    .get_cart(&CartKey::Session(session.clone()))
                    .await?
            }
        };

        let order = Order::from_cart(
            OrderId::new(),
            user_id,
            &cart,
            &self.default_currency,
            Utc::now(),
        )?;
        self.orders.insert(&order).await?;
        tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order created");

        for item in order.items() {
            if let Err(e) = self.reserve_line(order.id(), item).await {
                metrics::counter!("stock_reservation_conflicts_total").increment(1);
                tracing::warn!(
                    order_id = %order.id(),
                    product_id = %item.product_id,
                    error = %e,
                    "reservation failed, unwinding order"
                );
                self.unwind_failed_prepare(order.id()).await;
                return Err(e);
            }
        }

        metrics::counter!("orders_prepared_total").increment(1);
        metrics::histogram!("checkout_prepare_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(PreparedOrder {
            order_id: order.id(),
            status: order.status(),
            amount: order.total_amount(),
            currency: order.currency().clone(),
        })
    }

    /// Loads an order if `viewer` may see it.
    pub async fn get_order(&self, order_id: OrderId, viewer: &Viewer) -> Result<Order> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        let visible = match viewer {
            Viewer::Internal => true,
            Viewer::User(user_id) => order.is_owned_by(user_id),
            Viewer::Anonymous => false,
        };
        if !visible {
            return Err(CheckoutError::OrderNotFound(order_id));
        }
        Ok(order)
    }

    /// Deducts the reserved stock of every line and moves the order to
    /// `paid`. Already paid is a no-op; cancelled or refunded is a conflict.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, order_id: OrderId) -> Result<Transition> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        if order.status() == OrderStatus::Paid {
            return Ok(Transition::Unchanged);
        }
        order.status().ensure_transition(OrderStatus::Paid)?;

        for item in order.items() {
            match item.hold {
                HoldState::Reserved => {
                    let moved = self
                        .move_line(
                            order_id,
                            item,
                            HoldState::Reserved,
                            HoldState::Deducted,
                            OrderStatus::PendingPayment,
                        )
                        .await?;
                    if !moved {
                        self.ensure_line_in(order_id, item.line, HoldState::Deducted)
                            .await?;
                    }
                }
                HoldState::Deducted => {}
                HoldState::Pending | HoldState::Released => {
                    return Err(CheckoutError::Conflict(format!(
                        "line {} of order {order_id} holds no reserved stock ({})",
                        item.line, item.hold
                    )));
                }
            }
        }

        // Refused unless every line is still deducted.
        if !self.orders.settle_paid(order_id).await? {
            return self.settled_as(order_id, OrderStatus::Paid).await;
        }

        metrics::counter!("orders_paid_total").increment(1);
        tracing::info!(%order_id, "order paid");
        Ok(Transition::Applied)
    }

    /// Returns the order's stock and cancels it. A no-op unless the order
    /// is `pending_payment`; a missing order is logged and ignored.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, order_id: OrderId) -> Result<Transition> {
        let Some(order) = self.orders.get(order_id).await? else {
            tracing::info!(%order_id, "release requested for unknown order");
            return Ok(Transition::Unchanged);
        };
        if order.status() != OrderStatus::PendingPayment {
            return Ok(Transition::Unchanged);
        }

        self.return_stock(&order, OrderStatus::PendingPayment).await?;

        let applied = self
            .orders
            .transition(order_id, OrderStatus::PendingPayment, OrderStatus::Cancelled)
            .await?;
        if applied {
            metrics::counter!("orders_cancelled_total").increment(1);
            tracing::info!(%order_id, "order cancelled");
        }
        Ok(Transition::from_applied(applied))
    }

    /// Returns a paid order's stock and marks it refunded. A no-op unless
    /// the order is `paid`.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: OrderId) -> Result<Transition> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        if order.status() != OrderStatus::Paid {
            return Ok(Transition::Unchanged);
        }

        self.return_stock(&order, OrderStatus::Paid).await?;

        let applied = self
            .orders
            .transition(order_id, OrderStatus::Paid, OrderStatus::Refunded)
            .await?;
        if applied {
            metrics::counter!("orders_refunded_total").increment(1);
            tracing::info!(%order_id, "order refunded");
        }
        Ok(Transition::from_applied(applied))
    }

    /// Lists a user's orders, newest first.
    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>> {
        Ok(self.orders.list_for_user(user_id).await?)
    }

    /// Lists orders for the admin view.
    pub async fn list(&self, filter: OrderFilter) -> Result<OrderPage> {
        Ok(self.orders.list(filter).await?)
    }

    /// Claims a pending line and reserves its stock.
    async fn reserve_line(&self, order_id: OrderId, item: &OrderItem) -> Result<()> {
        let moved = self
            .move_line(
                order_id,
                item,
                HoldState::Pending,
                HoldState::Reserved,
                OrderStatus::PendingPayment,
            )
            .await?;
        if !moved {
            return Err(CheckoutError::Conflict(format!(
                "order {order_id} changed while it was being prepared"
            )));
        }
        Ok(())
    }

    /// Claims one line's hold from `from` to `to` while the order is in
    /// `status`, then performs the matching ledger call, putting the hold
    /// back if the call fails.
    ///
    /// Returns `false` without touching the ledger when the claim is lost.
    async fn move_line(
        &self,
        order_id: OrderId,
        item: &OrderItem,
        from: HoldState,
        to: HoldState,
        status: OrderStatus,
    ) -> Result<bool> {
        let claimed = self
            .orders
            .claim_item_hold(order_id, item.line, from, to, status)
            .await?;
        if !claimed {
            return Ok(false);
        }

        let result = match (from, to) {
            (HoldState::Pending, HoldState::Reserved) => {
                self.ledger.reserve(&item.product_id, item.quantity).await
            }
            (HoldState::Reserved, HoldState::Deducted) => {
                self.ledger.deduct(&item.product_id, item.quantity).await
            }
            (HoldState::Reserved, HoldState::Released) => {
                self.ledger.release(&item.product_id, item.quantity).await
            }
            (HoldState::Deducted, HoldState::Released) => {
                self.ledger.restock(&item.product_id, item.quantity).await
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!(
                %order_id,
                line = item.line,
                product_id = %item.product_id,
                error = %e,
                "ledger call failed, restoring hold"
            );
            self.orders
                .set_item_hold(order_id, item.line, to, from)
                .await?;
            return Err(e.into());
        }
        Ok(true)
    }

    /// Gives every line's stock back to the pool while the order stays in
    /// `status`. Stops at the first ledger failure; lines already returned
    /// stay returned, so a retry only touches the rest.
    async fn return_stock(&self, order: &Order, status: OrderStatus) -> Result<()> {
        for item in order.items() {
            self.return_line(order.id(), item, status).await?;
        }
        Ok(())
    }

    /// Releases one line from whatever hold it is in. A lost claim means a
    /// concurrent walk moved the line, so the line is re-read and retried
    /// from its new hold.
    async fn return_line(
        &self,
        order_id: OrderId,
        item: &OrderItem,
        status: OrderStatus,
    ) -> Result<()> {
        let mut hold = item.hold;
        for _ in 0..MAX_LINE_ATTEMPTS {
            if hold == HoldState::Released {
                return Ok(());
            }
            if self
                .move_line(order_id, item, hold, HoldState::Released, status)
                .await?
            {
                return Ok(());
            }

            let order = self
                .orders
                .get(order_id)
                .await?
                .ok_or(CheckoutError::OrderNotFound(order_id))?;
            if order.status() != status {
                return Err(CheckoutError::Conflict(format!(
                    "order {order_id} moved to {} while its stock was being returned",
                    order.status()
                )));
            }
            hold = order
                .item(item.line)
                .ok_or_else(|| {
                    CheckoutError::Conflict(format!("order {order_id} has no line {}", item.line))
                })?
                .hold;
        }
        Err(CheckoutError::Conflict(format!(
            "line {} of order {order_id} kept moving while its stock was being returned",
            item.line
        )))
    }

    async fn ensure_line_in(&self, order_id: OrderId, line: u32, hold: HoldState) -> Result<()> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        match order.item(line) {
            Some(item) if item.hold == hold => Ok(()),
            Some(item) => Err(CheckoutError::Conflict(format!(
                "line {line} of order {order_id} moved to {} concurrently",
                item.hold
            ))),
            None => Err(CheckoutError::Conflict(format!(
                "order {order_id} has no line {line}"
            ))),
        }
    }

    /// Best-effort rollback of a prepare whose reservation failed.
    async fn unwind_failed_prepare(&self, order_id: OrderId) {
        let result = async {
            let order = self
                .orders
                .get(order_id)
                .await?
                .ok_or(CheckoutError::OrderNotFound(order_id))?;
            self.return_stock(&order, OrderStatus::PendingPayment).await?;
            self.orders
                .transition(order_id, OrderStatus::PendingPayment, OrderStatus::Cancelled)
                .await?;
            Ok::<_, CheckoutError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                %order_id,
                error = %e,
                "failed to unwind order after reservation failure; release it manually"
            );
        }
    }

    /// Resolves a lost status race: `Unchanged` if the order ended up in
    /// `target`, a conflict otherwise.
    async fn settled_as(&self, order_id: OrderId, target: OrderStatus) -> Result<Transition> {
        let current = self
            .orders
            .get(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?
            .status();
        if current == target {
            return Ok(Transition::Unchanged);
        }
        Err(CheckoutError::Conflict(format!(
            "order {order_id} moved to {current} while being marked {target}"
        )))
    }
}

#[async_trait]
impl<O, C, L> OrdersApi for OrderService<O, C, L>
where
    O: OrderStore + ?Sized,
    C: CartReader + ?Sized,
    L: InventoryLedger + ?Sized,
{
    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        OrderService::get_order(self, order_id, &Viewer::Internal).await
    }

    async fn mark_paid(&self, order_id: OrderId) -> Result<Transition> {
        OrderService::mark_paid(self, order_id).await
    }

    async fn release(&self, order_id: OrderId) -> Result<Transition> {
        OrderService::release(self, order_id).await
    }
}
