//! Reconciliation sweeper for abandoned payments.
//!
//! A payment that stays `initiated` past the timeout never got its capture
//! webhook. The sweeper releases its order (returning the reserved stock)
//! and marks the payment `failed`. Every step is guarded, so the sweeper can
//! race webhooks and other sweepers safely.

use std::sync::Arc;

use chrono::Utc;
use storage::PaymentStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::{SweeperConfig, to_chrono};
use crate::error::Result;
use crate::services::OrdersApi;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub failed: usize,
    /// Stale payments whose order already had a captured payment; only the
    /// payment was failed.
    pub skipped_release: usize,
    /// Payments left `initiated` because the release failed.
    pub errors: usize,
}

pub struct PaymentSweeper<P: ?Sized, A: ?Sized> {
    payments: Arc<P>,
    orders: Arc<A>,
    config: SweeperConfig,
}

impl<P, A> PaymentSweeper<P, A>
where
    P: PaymentStore + ?Sized,
    A: OrdersApi + ?Sized,
{
    pub fn new(payments: Arc<P>, orders: Arc<A>, config: SweeperConfig) -> Self {
        Self {
            payments,
            orders,
            config,
        }
    }

    /// Handles one batch of stale payments.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let cutoff = Utc::now() - to_chrono(self.config.payment_timeout);
        let stale = self
            .payments
            .find_stale(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for payment in stale {
            let captured = self.payments.captured_for_order(payment.order_id).await?;
            if captured.is_some() {
                report.skipped_release += 1;
            } else if let Err(e) = self.orders.release(payment.order_id).await {
                tracing::warn!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    error = %e,
                    "release failed, retrying next sweep"
                );
                report.errors += 1;
                continue;
            }

            if self.payments.mark_failed(payment.id).await? {
                metrics::counter!("sweeper_payments_failed_total").increment(1);
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    "abandoned payment failed"
                );
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Sweeps on every tick until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.payment_timeout.as_secs(),
            "payment sweeper started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.examined > 0 => {
                            tracing::info!(?report, "sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("payment sweeper stopped");
    }
}
