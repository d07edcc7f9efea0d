//! Checkout saga orchestration.
//!
//! The checkout spans three independently owned stores (orders, payments,
//! inventory) with no distributed transaction between them. Every step is
//! an individually idempotent guarded update, and two background loops close
//! whatever a failed request leaves behind:
//!
//! 1. [`OrderService::prepare_order`] prices the cart and reserves stock
//! 2. [`PaymentService::initiate`] records the attempt and opens a gateway order
//! 3. [`PaymentService::handle_webhook`] captures the payment and marks the order paid
//! 4. [`PaymentSweeper`] releases orders whose payment never completed
//! 5. [`OutboxDrainer`] retries mark-paid calls that failed after a capture

pub mod config;
pub mod drainer;
pub mod error;
pub mod order_service;
pub mod payment_service;
pub mod services;
pub mod sweeper;

pub use config::{DrainerConfig, HttpClientConfig, RazorpayConfig, SweeperConfig};
pub use drainer::{DrainReport, OutboxDrainer};
pub use error::{CheckoutError, Result};
pub use order_service::{OrderService, PreparedOrder, Viewer};
pub use payment_service::{InitiatedPayment, PaymentService, WebhookOutcome};
pub use services::{
    CartKey, CartReader, HttpCartClient, HttpInventoryClient, HttpOrdersClient, InMemoryCartReader,
    InMemoryGateway, OrdersApi, PaymentGateway, RazorpayGateway, Transition,
};
pub use sweeper::{PaymentSweeper, SweepReport};
