//! Payment side of the checkout saga.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{OrderId, PaymentId};
use domain::{
    Currency, IdempotencyKey, Money, NewPayment, OrderStatus, Payment, PaymentStatus, UserId,
};
use serde::{Deserialize, Serialize};
use storage::{CaptureOutcome, OutboxStore, OutboxTask, PaymentStore};

use crate::config::to_chrono;
use crate::error::{CheckoutError, Result};
use crate::services::{OrdersApi, PaymentGateway};

/// The only webhook event that moves money.
pub const CAPTURE_EVENT: &str = "payment.captured";

/// Response of a successful (or replayed) initiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiatedPayment {
    pub payment_id: PaymentId,
    pub gateway: String,
    pub gateway_order_id: String,
    #[serde(rename = "amount_cents")]
    pub amount: Money,
    pub currency: Currency,
    pub status: PaymentStatus,
    /// True if the idempotency key had already been used for this order.
    pub replayed: bool,
}

/// What a verified webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event is not a capture.
    Ignored { event: String },
    Captured {
        payment_id: PaymentId,
        order_id: OrderId,
        /// False if the inline mark-paid failed and was left to the drainer.
        order_marked_paid: bool,
    },
    /// Redelivery of a capture already recorded.
    AlreadyCaptured { payment_id: PaymentId },
    /// Another payment of the order was captured first.
    DuplicateOrderCapture { payment_id: PaymentId, order_id: OrderId },
    UnknownGatewayOrder { gateway_order_id: String },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored { .. } => "ignored",
            WebhookOutcome::Captured { .. } => "captured",
            WebhookOutcome::AlreadyCaptured { .. } => "already_captured",
            WebhookOutcome::DuplicateOrderCapture { .. } => "duplicate_order_capture",
            WebhookOutcome::UnknownGatewayOrder { .. } => "unknown_gateway_order",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: WebhookPayment,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: String,
    #[serde(default)]
    status: Option<String>,
}

/// Records payment attempts and applies gateway captures.
pub struct PaymentService<P: ?Sized, Q: ?Sized, G: ?Sized, A: ?Sized> {
    payments: Arc<P>,
    outbox: Arc<Q>,
    gateway: Arc<G>,
    orders: Arc<A>,
    retry_delay: Duration,
}

impl<P: ?Sized, Q: ?Sized, G: ?Sized, A: ?Sized> Clone for PaymentService<P, Q, G, A> {
    fn clone(&self) -> Self {
        Self {
            payments: Arc::clone(&self.payments),
            outbox: Arc::clone(&self.outbox),
            gateway: Arc::clone(&self.gateway),
            orders: Arc::clone(&self.orders),
            retry_delay: self.retry_delay,
        }
    }
}

impl<P, Q, G, A> PaymentService<P, Q, G, A>
where
    P: PaymentStore + ?Sized,
    Q: OutboxStore + ?Sized,
    G: PaymentGateway + ?Sized,
    A: OrdersApi + ?Sized,
{
    /// `retry_delay` is how long a capture's mark-paid task waits before the
    /// drainer may pick it up.
    pub fn new(
        payments: Arc<P>,
        outbox: Arc<Q>,
        gateway: Arc<G>,
        orders: Arc<A>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            payments,
            outbox,
            gateway,
            orders,
            retry_delay,
        }
    }

    /// Starts (or replays) a payment for an order.
    ///
    /// The amount always comes from the stored order. A replayed key returns
    /// the first attempt's identifiers without calling the gateway again.
    #[tracing::instrument(skip(self, user_id))]
    pub async fn initiate(
        &self,
        order_id: OrderId,
        idempotency_key: &str,
        user_id: Option<UserId>,
    ) -> Result<InitiatedPayment> {
        let key = IdempotencyKey::new(idempotency_key)?;

        let order = self.orders.get_order(order_id).await.map_err(|e| match e {
            CheckoutError::OrderNotFound(_) | CheckoutError::Upstream(_) => e,
            other => CheckoutError::Upstream(format!("orders lookup failed: {other}")),
        })?;

        if let (Some(caller), Some(owner)) = (&user_id, order.user_id())
            && caller != owner
        {
            return Err(CheckoutError::OrderNotFound(order_id));
        }
        if order.status() != OrderStatus::PendingPayment {
            return Err(CheckoutError::NotPayable {
                order_id,
                status: order.status(),
            });
        }

        let request = NewPayment::new(
            key,
            order_id,
            user_id,
            self.gateway.name(),
            order.total_amount(),
            order.currency().clone(),
        )?;
        let upsert = self.payments.create_or_get(request).await?;
        let replayed = !upsert.was_inserted();
        let payment = upsert.into_inner();

        let payment = if payment.gateway_order_id.is_some() {
            payment
        } else {
            let gateway_order_id = self
                .gateway
                .create_remote_order(payment.amount, &payment.currency, &order_id.to_string())
                .await?;
            self.payments
                .attach_gateway_order(payment.id, &gateway_order_id)
                .await?
        };

        let gateway_order_id = payment.gateway_order_id.clone().ok_or_else(|| {
            CheckoutError::Gateway(format!("payment {} has no gateway order", payment.id))
        })?;

        if !replayed {
            metrics::counter!("payments_initiated_total").increment(1);
            tracing::info!(payment_id = %payment.id, %gateway_order_id, "payment initiated");
        }

        Ok(InitiatedPayment {
            payment_id: payment.id,
            gateway: payment.gateway,
            gateway_order_id,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status,
            replayed,
        })
    }

    /// Verifies and applies a gateway webhook delivery.
    ///
    /// The signature is checked against the raw bytes before anything is
    /// parsed. A new capture enqueues a mark-paid task atomically and then
    /// tries it once inline.
    #[tracing::instrument(skip_all)]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let verified = signature.is_some_and(|sig| self.gateway.verify_signature(body, sig));
        if !verified {
            metrics::counter!("webhook_events_total", "outcome" => "rejected").increment(1);
            tracing::warn!("webhook signature rejected");
            return Err(CheckoutError::InvalidSignature);
        }

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| CheckoutError::MalformedWebhook(e.to_string()))?;

        let outcome = if event.event != CAPTURE_EVENT {
            WebhookOutcome::Ignored { event: event.event }
        } else {
            let entity = serde_json::from_value::<WebhookPayload>(event.payload)
                .map_err(|e| CheckoutError::MalformedWebhook(e.to_string()))?
                .payment
                .entity;
            match entity.status.as_deref() {
                Some(status) if status != "captured" => WebhookOutcome::Ignored { event: event.event },
                _ => self.capture(&entity.order_id, &entity.id).await?,
            }
        };

        metrics::counter!("webhook_events_total", "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments
            .get(payment_id)
            .await?
            .ok_or(CheckoutError::PaymentNotFound(payment_id))
    }

    async fn capture(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Result<WebhookOutcome> {
        let retry_at = Utc::now() + to_chrono(self.retry_delay);
        let outcome = self
            .payments
            .mark_captured(gateway_order_id, gateway_payment_id, retry_at)
            .await?;

        match outcome {
            CaptureOutcome::Captured { payment, task } => {
                metrics::counter!("payments_captured_total").increment(1);
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    "payment captured"
                );
                let order_marked_paid = self.mark_paid_inline(&task).await;
                Ok(WebhookOutcome::Captured {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                    order_marked_paid,
                })
            }
            CaptureOutcome::AlreadyCaptured(payment) => {
                tracing::info!(payment_id = %payment.id, "capture redelivered, nothing to do");
                Ok(WebhookOutcome::AlreadyCaptured {
                    payment_id: payment.id,
                })
            }
            CaptureOutcome::DuplicateOrderCapture(payment) => {
                tracing::error!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    "order already has a captured payment; refund this one manually"
                );
                Ok(WebhookOutcome::DuplicateOrderCapture {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                })
            }
            CaptureOutcome::UnknownGatewayOrder => {
                tracing::warn!(gateway_order_id, "capture for unknown gateway order");
                Ok(WebhookOutcome::UnknownGatewayOrder {
                    gateway_order_id: gateway_order_id.to_string(),
                })
            }
        }
    }

    /// Tries the freshly enqueued task once. The task stays pending on
    /// failure so the drainer can retry it.
    async fn mark_paid_inline(&self, task: &OutboxTask) -> bool {
        let result = match self.orders.mark_paid(task.order_id).await {
            Ok(_) => self.outbox.complete(task.id).await.map_err(CheckoutError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    order_id = %task.order_id,
                    task_id = %task.id,
                    error = %e,
                    "inline mark-paid failed, leaving task to the drainer"
                );
                if let Err(e2) = self
                    .outbox
                    .reschedule(task.id, &e.to_string(), task.next_attempt_at)
                    .await
                {
                    tracing::error!(task_id = %task.id, error = %e2, "failed to record task error");
                }
                false
            }
        }
    }
}
