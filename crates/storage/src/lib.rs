//! Persistence for the checkout saga.
//!
//! Each store owns one kind of record and exposes only guarded updates
//! (`... WHERE status = $from`), so concurrent callers can race without
//! corrupting state:
//! - [`OrderStore`]: orders, their items and per-line holds
//! - [`PaymentStore`]: payment attempts keyed by idempotency key
//! - [`OutboxStore`]: follow-up tasks written together with a capture
//! - [`InventoryLedger`]: per-product `available`/`reserved` counters
//!
//! Every trait has an in-memory implementation for tests and local runs and
//! a PostgreSQL implementation backed by `sqlx`.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{InventoryError, Result, StoreError};
pub use ledger::{InventoryLedger, StockLevel};
pub use memory::{InMemoryInventoryLedger, InMemoryOrderStore, InMemoryPaymentStore};
pub use outbox::{OutboxTask, TaskKind, TaskStatus};
pub use postgres::{PgInventoryLedger, PgOrderStore, PgPaymentStore, run_migrations};
pub use store::{
    CaptureOutcome, OrderFilter, OrderPage, OrderStore, OutboxStore, PaymentStore, Upsert,
};
