//! Order status machine and per-line stock holds.

use serde::{Deserialize, Serialize};

use super::OrderError;
use crate::error::ParseStatusError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──┬──► Paid ──► Refunded
///                  └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order was created from a cart and awaits payment.
    #[default]
    #[serde(alias = "draft", alias = "payment_pending")]
    PendingPayment,

    /// Payment was captured and stock deducted (terminal success).
    Paid,

    /// Order was abandoned before payment and its stock returned.
    Cancelled,

    /// Order was refunded after payment and its stock returned.
    Refunded,
}

impl OrderStatus {
    /// Returns true if a payment may be initiated in this status.
    pub fn is_payable(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Returns true if the order can be marked paid from this status.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Returns true if the order can be cancelled from this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Returns true if the order can be refunded from this status.
    pub fn can_refund(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// Returns true if `to` is a legal next status.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        match to {
            OrderStatus::PendingPayment => false,
            OrderStatus::Paid => self.can_mark_paid(),
            OrderStatus::Cancelled => self.can_cancel(),
            OrderStatus::Refunded => self.can_refund(),
        }
    }

    /// Fails unless `self -> to` is an edge of the state machine.
    pub fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        if self.can_transition_to(to) {
            return Ok(());
        }
        Err(OrderError::InvalidStateTransition {
            current_state: *self,
            action: to.action(),
        })
    }

    /// Returns true if no transition leaves this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Returns the persisted name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Returns the verb used in transition errors.
    fn action(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "reopen",
            OrderStatus::Paid => "mark paid",
            OrderStatus::Cancelled => "cancel",
            OrderStatus::Refunded => "refund",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" | "payment_pending" | "draft" => Ok(OrderStatus::PendingPayment),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(ParseStatusError::new("order", other)),
        }
    }
}

/// What the inventory ledger currently holds for one order line.
///
/// ```text
/// Pending ──► Reserved ──┬──► Deducted ──► Released
///    │                   └──► Released
///    └──► Released
/// ```
///
/// A hold is claimed (moved forward) before the matching ledger call and
/// moved back if that call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    /// Nothing reserved yet.
    #[default]
    Pending,
    /// Units moved from available to reserved.
    Reserved,
    /// Reserved units consumed by a paid order.
    Deducted,
    /// Units returned to the sellable pool (or never taken).
    Released,
}

impl HoldState {
    /// Returns the persisted name of the hold.
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::Pending => "pending",
            HoldState::Reserved => "reserved",
            HoldState::Deducted => "deducted",
            HoldState::Released => "released",
        }
    }

    /// Returns true if the line still has units taken from the pool.
    pub fn holds_stock(&self) -> bool {
        matches!(self, HoldState::Reserved | HoldState::Deducted)
    }
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HoldState {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HoldState::Pending),
            "reserved" => Ok(HoldState::Reserved),
            "deducted" => Ok(HoldState::Deducted),
            "released" => Ok(HoldState::Released),
            other => Err(ParseStatusError::new("hold", other)),
        }
    }
}
