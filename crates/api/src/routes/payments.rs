//! Payment initiation, gateway webhook and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use common::PaymentId;
use domain::{Payment, UserId};
use saga::services::USER_ID_HEADER;
use saga::{InitiatedPayment, WebhookOutcome};

use crate::auth::{InternalCaller, header};
use crate::error::ApiError;
use crate::routes::orders::parse_order_id;
use crate::state::AppState;

pub const ORDER_ID_HEADER: &str = "X-ORDER-ID";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

/// POST /v1/payments/initiate: start or replay a payment for an order.
#[tracing::instrument(skip(state, headers))]
pub async fn initiate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<InitiatedPayment>, ApiError> {
    let order_id = header(&headers, ORDER_ID_HEADER);
    let key = header(&headers, IDEMPOTENCY_KEY_HEADER);

    let (order_id, key) = match (order_id, key) {
        (Some(order_id), Some(key)) => (order_id, key),
        (order_id, key) => {
            let missing: Vec<&str> = [
                order_id.is_none().then_some(ORDER_ID_HEADER),
                key.is_none().then_some(IDEMPOTENCY_KEY_HEADER),
            ]
            .into_iter()
            .flatten()
            .collect();
            return Err(ApiError::BadRequest(format!(
                "missing required headers: {}",
                missing.join(", ")
            )));
        }
    };

    let order_id = parse_order_id(order_id)?;
    let user_id = header(&headers, USER_ID_HEADER).and_then(|v| UserId::new(v).ok());

    let initiated = state.payments.initiate(order_id, key, user_id).await?;
    Ok(Json(initiated))
}

/// POST /v1/payments/webhook/razorpay: apply a signed gateway event.
#[tracing::instrument(skip_all)]
pub async fn razorpay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let signature = header(&headers, SIGNATURE_HEADER);
    let outcome = state.payments.handle_webhook(&body, signature).await?;
    Ok(Json(outcome))
}

/// GET /v1/payments/{id}: internal payment lookup.
#[tracing::instrument(skip(state, _caller))]
pub async fn get(
    _caller: InternalCaller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id: PaymentId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid payment id: {e}")))?;
    Ok(Json(state.payments.get_payment(payment_id).await?))
}
