//! Shared identifier types for the checkout services.

pub mod types;

pub use types::{OrderId, PaymentId, TaskId};
