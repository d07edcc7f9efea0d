//! Domain model for the checkout saga.
//!
//! This crate provides the types every other crate agrees on:
//! - `Order` with its status machine and per-line stock holds
//! - `Payment` with its status machine and idempotency key
//! - `CartSnapshot`, the typed contract read from the cart service
//! - `Money` and `Currency` value objects in minor units

pub mod cart;
pub mod error;
pub mod order;
pub mod payment;

pub use cart::{CartLine, CartSnapshot};
pub use common::{OrderId, PaymentId, TaskId};
pub use error::ParseStatusError;
pub use order::{
    Currency, HoldState, Money, Order, OrderError, OrderItem, OrderParts, OrderStatus, ProductId,
    SessionId, UserId,
};
pub use payment::{IdempotencyKey, NewPayment, Payment, PaymentError, PaymentStatus};
