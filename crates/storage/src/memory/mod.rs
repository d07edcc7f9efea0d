//! In-memory store implementations for tests and local runs.
//!
//! State lives behind a `tokio::sync::RwLock` and every guarded update is
//! applied under a single write lock, which gives the same atomicity as the
//! single-statement updates of the PostgreSQL stores.

mod inventory;
mod orders;
mod payments;

pub use inventory::InMemoryInventoryLedger;
pub use orders::InMemoryOrderStore;
pub use payments::InMemoryPaymentStore;
