//! PostgreSQL store implementations.
//!
//! Guarded transitions are single `UPDATE ... WHERE` statements; writes that
//! span rows (an order with its items, a capture with its outbox task) run in
//! one transaction.

mod inventory;
mod orders;
mod payments;

pub use inventory::PgInventoryLedger;
pub use orders::PgOrderStore;
pub use payments::PgPaymentStore;

use sqlx::PgPool;

/// Runs the database migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
