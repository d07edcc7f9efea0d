//! Checkout error types.

use common::{OrderId, PaymentId};
use domain::{OrderError, OrderStatus, PaymentError, ProductId};
use storage::{InventoryError, StoreError};
use thiserror::Error;

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request was malformed or incomplete.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The cart or order failed validation.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The payment request failed validation.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// The order cannot accept a payment in its current status.
    #[error("Order {order_id} is not payable in {status} status")]
    NotPayable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A reserve, deduct or release guard did not hold.
    #[error("Insufficient stock for {product_id}")]
    StockConflict { product_id: ProductId },

    #[error("Idempotency key {key} is already used for order {existing_order}")]
    IdempotencyConflict { key: String, existing_order: OrderId },

    /// The operation conflicts with the current state of a record.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A caller presented a missing or wrong shared secret.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedWebhook(String),

    /// A collaborating service failed or answered unexpectedly.
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// The payment gateway failed or answered unexpectedly.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl CheckoutError {
    /// Returns true for errors caused by the state of a record rather than
    /// by the caller or by infrastructure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CheckoutError::StockConflict { .. }
                | CheckoutError::IdempotencyConflict { .. }
                | CheckoutError::Conflict(_)
                | CheckoutError::Order(OrderError::InvalidStateTransition { .. })
        )
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => CheckoutError::OrderNotFound(id),
            StoreError::PaymentNotFound(id) => CheckoutError::PaymentNotFound(id),
            StoreError::IdempotencyConflict {
                key,
                existing_order,
            } => CheckoutError::IdempotencyConflict {
                key,
                existing_order,
            },
            StoreError::Order(e) => CheckoutError::Order(e),
            other => CheckoutError::Storage(other),
        }
    }
}

impl From<InventoryError> for CheckoutError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock { product_id, .. }
            | InventoryError::InsufficientReserved { product_id, .. } => {
                CheckoutError::StockConflict { product_id }
            }
            InventoryError::UnknownProduct(product_id) => CheckoutError::UnknownProduct(product_id),
            InventoryError::InvalidQuantity(q) => {
                CheckoutError::InvalidRequest(format!("invalid quantity {q}"))
            }
            InventoryError::Unavailable(msg) => CheckoutError::Upstream(msg),
            InventoryError::Database(e) => CheckoutError::Storage(StoreError::Database(e)),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
