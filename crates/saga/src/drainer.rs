//! Outbox drainer for `mark_order_paid` tasks.

use std::sync::Arc;

use chrono::Utc;
use storage::{OutboxStore, OutboxTask, TaskKind};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::{DrainerConfig, to_chrono};
use crate::error::Result;
use crate::services::OrdersApi;

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Retries follow-up calls that failed after a capture.
///
/// A task that keeps failing is retried after a fixed delay until it has
/// been attempted `max_attempts` times. Conflicts (an order cancelled or
/// refunded before its capture landed) are dead-lettered straight away.
pub struct OutboxDrainer<Q: ?Sized, A: ?Sized> {
    outbox: Arc<Q>,
    orders: Arc<A>,
    config: DrainerConfig,
}

impl<Q, A> OutboxDrainer<Q, A>
where
    Q: OutboxStore + ?Sized,
    A: OrdersApi + ?Sized,
{
    pub fn new(outbox: Arc<Q>, orders: Arc<A>, config: DrainerConfig) -> Self {
        Self {
            outbox,
            orders,
            config,
        }
    }

    /// Claims and runs one batch of due tasks.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let now = Utc::now();
        let tasks = self
            .outbox
            .claim_due(now, to_chrono(self.config.lease), self.config.batch_size)
            .await?;

        let mut report = DrainReport {
            claimed: tasks.len(),
            ..DrainReport::default()
        };

        for task in tasks {
            let result = match task.kind {
                TaskKind::MarkOrderPaid => self.orders.mark_paid(task.order_id).await,
            };

            match result {
                Ok(_) => {
                    self.outbox.complete(task.id).await?;
                    metrics::counter!("outbox_tasks_completed_total").increment(1);
                    tracing::info!(task_id = %task.id, order_id = %task.order_id, "task completed");
                    report.completed += 1;
                }
                Err(e) if e.is_conflict() || task.attempts >= self.config.max_attempts => {
                    self.dead_letter(&task, &e.to_string()).await?;
                    report.dead += 1;
                }
                Err(e) => {
                    let next = Utc::now() + to_chrono(self.config.retry_delay);
                    self.outbox.reschedule(task.id, &e.to_string(), next).await?;
                    tracing::warn!(
                        task_id = %task.id,
                        order_id = %task.order_id,
                        attempts = task.attempts,
                        error = %e,
                        "task failed, rescheduled"
                    );
                    report.retried += 1;
                }
            }
        }

        Ok(report)
    }

    async fn dead_letter(&self, task: &OutboxTask, error: &str) -> Result<()> {
        self.outbox.mark_dead(task.id, error).await?;
        metrics::counter!("outbox_tasks_dead_total").increment(1);
        tracing::error!(
            task_id = %task.id,
            order_id = %task.order_id,
            payment_id = %task.payment_id,
            attempts = task.attempts,
            error,
            "task dead-lettered; the captured payment needs manual handling"
        );
        Ok(())
    }

    /// Drains on every tick until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "outbox drainer started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.drain_once().await {
                        Ok(report) if report.claimed > 0 => {
                            tracing::info!(?report, "drain finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "drain failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox drainer stopped");
    }
}
