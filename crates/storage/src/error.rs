use common::{OrderId, PaymentId};
use domain::{OrderError, ParseStatusError, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the order and payment stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The idempotency key was first used for a different order.
    #[error("Idempotency key {key} is already bound to order {existing_order}")]
    IdempotencyConflict { key: String, existing_order: OrderId },

    /// A guarded update was rejected by the order state machine.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A persisted value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<ParseStatusError> for StoreError {
    fn from(err: ParseStatusError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by an inventory ledger.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// `available` is lower than the requested reservation.
    #[error("Insufficient stock for {product_id}: requested {requested}")]
    InsufficientStock { product_id: ProductId, requested: u32 },

    /// `reserved` is lower than the requested deduct or release.
    #[error("Insufficient reserved stock for {product_id}: requested {requested}")]
    InsufficientReserved { product_id: ProductId, requested: u32 },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The remote ledger could not be reached or answered unexpectedly.
    #[error("Inventory service error: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InventoryError {
    /// Returns true if the error reports a counter guard that did not hold.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            InventoryError::InsufficientStock { .. } | InventoryError::InsufficientReserved { .. }
        )
    }
}
