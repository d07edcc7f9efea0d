//! Outbox task records.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, TaskId};
use domain::ParseStatusError;
use serde::{Deserialize, Serialize};

/// What an outbox task asks the drainer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Move the captured payment's order to `paid`.
    MarkOrderPaid,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MarkOrderPaid => "mark_order_paid",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_order_paid" => Ok(TaskKind::MarkOrderPaid),
            other => Err(ParseStatusError {
                kind: "task kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
    /// Gave up after the maximum number of attempts.
    Dead,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Done => "done",
            TaskStatus::Dead => "dead",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "done" => Ok(TaskStatus::Done),
            "dead" => Ok(TaskStatus::Dead),
            other => Err(ParseStatusError {
                kind: "task",
                value: other.to_string(),
            }),
        }
    }
}

/// A durable unit of follow-up work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub status: TaskStatus,
    /// Number of times the drainer has claimed the task.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxTask {
    /// Creates a pending `mark_order_paid` task.
    pub fn mark_order_paid(
        order_id: OrderId,
        payment_id: PaymentId,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            kind: TaskKind::MarkOrderPaid,
            order_id,
            payment_id,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the task is pending and due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_attempt_at <= now
    }
}
