//! Payment attempts and their status machine.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ParseStatusError;
use crate::order::{Currency, Money, UserId};

/// Maximum accepted length of an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Errors raised while building a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Idempotency key must not be empty")]
    EmptyIdempotencyKey,

    #[error("Idempotency key longer than {MAX_IDEMPOTENCY_KEY_LEN} characters")]
    IdempotencyKeyTooLong,

    /// Payments are only created for positive amounts.
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(i64),
}

/// Caller-supplied key that makes payment initiation replayable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, PaymentError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(PaymentError::EmptyIdempotencyKey);
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(PaymentError::IdempotencyKeyTooLong);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The status of a payment attempt.
///
/// ```text
/// Initiated ──┬──► Captured
///             └──► Failed ──► Captured (late capture)
/// ```
///
/// A captured payment never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Initiated,
    Captured,
    Failed,
}

impl PaymentStatus {
    /// Returns true if a gateway capture may still be recorded.
    pub fn can_capture(&self) -> bool {
        !matches!(self, PaymentStatus::Captured)
    }

    /// Returns true if the sweeper may fail this payment.
    pub fn can_fail(&self) -> bool {
        matches!(self, PaymentStatus::Initiated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(PaymentStatus::Initiated),
            "captured" => Ok(PaymentStatus::Captured),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ParseStatusError::new("payment", other)),
        }
    }
}

/// A validated request to record a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub id: PaymentId,
    pub idempotency_key: IdempotencyKey,
    pub order_id: OrderId,
    pub user_id: Option<UserId>,
    pub gateway: String,
    pub amount: Money,
    pub currency: Currency,
}

impl NewPayment {
    /// Creates a payment request; the amount must be the order's positive total.
    pub fn new(
        idempotency_key: IdempotencyKey,
        order_id: OrderId,
        user_id: Option<UserId>,
        gateway: impl Into<String>,
        amount: Money,
        currency: Currency,
    ) -> Result<Self, PaymentError> {
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount(amount.minor()));
        }
        Ok(Self {
            id: PaymentId::new(),
            idempotency_key,
            order_id,
            user_id,
            gateway: gateway.into(),
            amount,
            currency,
        })
    }

    /// Materialises the `initiated` payment row.
    pub fn into_payment(self, now: DateTime<Utc>) -> Payment {
        Payment {
            id: self.id,
            idempotency_key: self.idempotency_key,
            order_id: self.order_id,
            user_id: self.user_id,
            gateway: self.gateway,
            gateway_order_id: None,
            gateway_payment_id: None,
            amount: self.amount,
            currency: self.currency,
            status: PaymentStatus::Initiated,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A recorded payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub idempotency_key: IdempotencyKey,
    pub order_id: OrderId,
    pub user_id: Option<UserId>,
    /// Name of the gateway that owns `gateway_order_id`.
    pub gateway: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    #[serde(rename = "amount_cents")]
    pub amount: Money,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_captured(&self) -> bool {
        self.status == PaymentStatus::Captured
    }
}
