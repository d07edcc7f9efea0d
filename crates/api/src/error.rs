//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::CheckoutError;
use storage::{InventoryError, StoreError};

use crate::config::ConfigError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or wrong shared secret.
    Unauthorized,
    /// Checkout operation error.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        metrics::counter!("api_errors_total", "status" => status.as_u16().to_string()).increment(1);
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    let status = match &err {
        CheckoutError::InvalidRequest(_)
        | CheckoutError::Payment(_)
        | CheckoutError::NotPayable { .. }
        | CheckoutError::MalformedWebhook(_) => StatusCode::BAD_REQUEST,
        CheckoutError::Order(_) if err.is_conflict() => StatusCode::CONFLICT,
        CheckoutError::Order(_) => StatusCode::BAD_REQUEST,
        CheckoutError::Unauthorized | CheckoutError::InvalidSignature => StatusCode::UNAUTHORIZED,
        CheckoutError::OrderNotFound(_)
        | CheckoutError::PaymentNotFound(_)
        | CheckoutError::UnknownProduct(_) => StatusCode::NOT_FOUND,
        CheckoutError::StockConflict { .. }
        | CheckoutError::IdempotencyConflict { .. }
        | CheckoutError::Conflict(_) => StatusCode::CONFLICT,
        CheckoutError::Upstream(_) | CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "checkout request failed");
    }
    (status, err.to_string())
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Checkout(err.into())
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}
