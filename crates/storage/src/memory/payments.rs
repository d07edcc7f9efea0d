use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{OrderId, PaymentId, TaskId};
use domain::{NewPayment, Payment, PaymentStatus};
use tokio::sync::RwLock;

use crate::{
    CaptureOutcome, OutboxStore, OutboxTask, PaymentStore, Result, StoreError, TaskStatus, Upsert,
};

#[derive(Default)]
struct PaymentState {
    payments: HashMap<PaymentId, Payment>,
    by_key: HashMap<String, PaymentId>,
    tasks: HashMap<TaskId, OutboxTask>,
}

/// In-memory payment store; also holds the outbox so a capture and its
/// task are written under the same lock.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<PaymentState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored payments.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Returns every payment recorded for an order.
    pub async fn payments_for_order(&self, order_id: OrderId) -> Vec<Payment> {
        self.state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create_or_get(&self, payment: NewPayment) -> Result<Upsert<Payment>> {
        let mut state = self.state.write().await;

        if let Some(id) = state.by_key.get(payment.idempotency_key.as_str())
            && let Some(existing) = state.payments.get(id)
        {
            if existing.order_id != payment.order_id {
                return Err(StoreError::IdempotencyConflict {
                    key: payment.idempotency_key.to_string(),
                    existing_order: existing.order_id,
                });
            }
            return Ok(Upsert::Existing(existing.clone()));
        }

        let payment = payment.into_payment(Utc::now());
        state
            .by_key
            .insert(payment.idempotency_key.to_string(), payment.id);
        state.payments.insert(payment.id, payment.clone());
        Ok(Upsert::Inserted(payment))
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn attach_gateway_order(&self, id: PaymentId, gateway_order_id: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or(StoreError::PaymentNotFound(id))?;
        if payment.gateway_order_id.is_none() {
            payment.gateway_order_id = Some(gateway_order_id.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(payment.clone())
    }

    async fn mark_captured(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<CaptureOutcome> {
        let mut state = self.state.write().await;

        let Some(payment) = state
            .payments
            .values()
            .find(|p| p.gateway_order_id.as_deref() == Some(gateway_order_id))
            .cloned()
        else {
            return Ok(CaptureOutcome::UnknownGatewayOrder);
        };

        if payment.is_captured() {
            return Ok(CaptureOutcome::AlreadyCaptured(payment));
        }

        let order_already_captured = state
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id && p.id != payment.id && p.is_captured());
        if order_already_captured {
            return Ok(CaptureOutcome::DuplicateOrderCapture(payment));
        }

        let now = Utc::now();
        let task = OutboxTask::mark_order_paid(payment.order_id, payment.id, retry_at, now);
        state.tasks.insert(task.id, task.clone());

        let stored = state
            .payments
            .get_mut(&payment.id)
            .ok_or(StoreError::PaymentNotFound(payment.id))?;
        stored.status = PaymentStatus::Captured;
        stored.gateway_payment_id = Some(gateway_payment_id.to_string());
        stored.updated_at = now;

        Ok(CaptureOutcome::Captured {
            payment: stored.clone(),
            task,
        })
    }

    async fn captured_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.order_id == order_id && p.is_captured())
            .cloned())
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut stale: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Initiated && p.created_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn mark_failed(&self, id: PaymentId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(&id) {
            Some(payment) if payment.status.can_fail() => {
                payment.status = PaymentStatus::Failed;
                payment.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryPaymentStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: u32,
    ) -> Result<Vec<OutboxTask>> {
        let mut state = self.state.write().await;

        let mut due: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .map(|t| t.id)
            .collect();
        due.sort_by_key(|id| state.tasks.get(id).map(|t| t.next_attempt_at));
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(task) = state.tasks.get_mut(&id) {
                task.attempts += 1;
                task.next_attempt_at = now + lease;
                task.updated_at = now;
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        if let Some(task) = self.state.write().await.tasks.get_mut(&id) {
            task.status = TaskStatus::Done;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: TaskId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(task) = self.state.write().await.tasks.get_mut(&id)
            && task.status == TaskStatus::Pending
        {
            task.last_error = Some(error.to_string());
            task.next_attempt_at = next_attempt_at;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_dead(&self, id: TaskId, error: &str) -> Result<()> {
        if let Some(task) = self.state.write().await.tasks.get_mut(&id)
            && task.status == TaskStatus::Pending
        {
            task.status = TaskStatus::Dead;
            task.last_error = Some(error.to_string());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<OutboxTask>> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn tasks_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<OutboxTask> = state
            .tasks
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}
