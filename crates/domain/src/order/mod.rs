//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderItem, OrderParts};
pub use state::{HoldState, OrderStatus};
pub use value_objects::{Currency, Money, ProductId, SessionId, UserId};

use thiserror::Error;

/// Errors that can occur while building or transitioning an order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The cart snapshot had no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line had a zero or negative quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: i64 },

    /// A cart line had a zero or negative unit price.
    #[error("Invalid price for {product_id}: {price} (must be greater than 0)")]
    InvalidPrice { product_id: String, price: i64 },

    /// The order total does not fit in a 64-bit minor-unit amount.
    #[error("Order total overflows")]
    TotalOverflow,

    /// A currency code was not three ASCII letters.
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    /// An identifier was empty.
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),

    /// The requested status change is not an edge of the order state machine.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// No item with the given line number exists on the order.
    #[error("Order has no line {line}")]
    LineNotFound { line: u32 },
}
