//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{Currency, HoldState, Money, OrderError, OrderStatus, ProductId, UserId};
use crate::cart::CartSnapshot;

/// A line item of an order, priced at the moment the order was prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// 1-based position of the line in the order.
    pub line: u32,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price snapshotted from the cart; never re-read from the catalog.
    #[serde(rename = "unit_price_cents")]
    pub unit_price: Money,
    pub hold: HoldState,
}

impl OrderItem {
    /// Returns quantity times unit price, or `None` on overflow.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Order aggregate root.
///
/// The total is computed once in [`Order::from_cart`] and never recomputed.
/// Status and holds only move through the guarded [`Order::transition`] and
/// [`Order::set_hold`] methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    /// Absent for guest checkout.
    user_id: Option<UserId>,
    status: OrderStatus,
    currency: Currency,
    #[serde(rename = "total_amount_cents")]
    total_amount: Money,
    items: Vec<OrderItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Raw order fields as loaded from storage.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub status: OrderStatus,
    pub currency: Currency,
    pub total_amount: Money,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `pending_payment` order from a cart snapshot.
    ///
    /// Every line must have a positive quantity and price. The cart's own
    /// currency wins over `default_currency` when present.
    pub fn from_cart(
        id: OrderId,
        user_id: Option<UserId>,
        cart: &CartSnapshot,
        default_currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut items = Vec::with_capacity(cart.items.len());
        let mut total = Money::zero();

        for (index, line) in cart.items.iter().enumerate() {
            let quantity = u32::try_from(line.quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| OrderError::InvalidQuantity {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                })?;

            if line.unit_price <= 0 {
                return Err(OrderError::InvalidPrice {
                    product_id: line.product_id.to_string(),
                    price: line.unit_price,
                });
            }

            let item = OrderItem {
                line: index as u32 + 1,
                product_id: line.product_id.clone(),
                quantity,
                unit_price: Money::from_minor(line.unit_price),
                hold: HoldState::Pending,
            };

            total = item
                .subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or(OrderError::TotalOverflow)?;
            items.push(item);
        }

        Ok(Self {
            id,
            user_id,
            status: OrderStatus::PendingPayment,
            currency: cart
                .currency
                .clone()
                .unwrap_or_else(|| default_currency.clone()),
            total_amount: total,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Reassembles an order from persisted fields.
    pub fn from_parts(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            user_id: parts.user_id,
            status: parts.status,
            currency: parts.currency,
            total_amount: parts.total_amount,
            items: parts.items,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the item with the given line number.
    pub fn item(&self, line: u32) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.line == line)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order belongs to the given user.
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        self.user_id.as_ref() == Some(user_id)
    }

    /// Returns the total quantity of all items.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

// Guarded mutations
impl Order {
    /// Moves the order from `from` to `to` if it is currently in `from`.
    ///
    /// Returns `Ok(false)` when the order is in some other status, and an
    /// error when `from -> to` is not an edge of the state machine.
    pub fn transition(
        &mut self,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        from.ensure_transition(to)?;
        if self.status != from {
            return Ok(false);
        }
        self.status = to;
        self.updated_at = at;
        Ok(true)
    }

    /// Moves a `pending_payment` order to `paid` if every line's stock has
    /// been deducted. Returns `false` otherwise.
    pub fn settle_paid(&mut self, at: DateTime<Utc>) -> Result<bool, OrderError> {
        if self.status != OrderStatus::PendingPayment || !self.all_deducted() {
            return Ok(false);
        }
        self.transition(OrderStatus::PendingPayment, OrderStatus::Paid, at)
    }

    pub fn all_deducted(&self) -> bool {
        self.items.iter().all(|item| item.hold == HoldState::Deducted)
    }

    /// Moves one line's hold from `from` to `to` if it is currently `from`.
    pub fn set_hold(
        &mut self,
        line: u32,
        from: HoldState,
        to: HoldState,
        at: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.line == line)
            .ok_or(OrderError::LineNotFound { line })?;
        if item.hold != from {
            return Ok(false);
        }
        item.hold = to;
        self.updated_at = at;
        Ok(true)
    }
}
