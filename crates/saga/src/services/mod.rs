//! Collaborator contracts and their implementations.
//!
//! Each collaborator is an `async_trait` so the orchestrators can run against
//! in-memory doubles in tests, in-process services in a single binary, or
//! HTTP clients when the services are deployed separately.

pub mod cart;
pub mod gateway;
pub mod inventory;
pub mod orders;

pub use cart::{CartKey, CartReader, HttpCartClient, InMemoryCartReader};
pub use gateway::{InMemoryGateway, PaymentGateway, RazorpayGateway};
pub use inventory::HttpInventoryClient;
pub use orders::{HttpOrdersClient, OrdersApi, Transition, TransitionResponse};

use crate::config::HttpClientConfig;
use crate::error::{CheckoutError, Result};

/// Header carrying the shared secret of internal callers.
pub const INTERNAL_KEY_HEADER: &str = "X-INTERNAL-KEY";
/// Header carrying the catalog admin secret.
pub const ADMIN_KEY_HEADER: &str = "X-ADMIN-KEY";
/// Header identifying an authenticated user.
pub const USER_ID_HEADER: &str = "X-USER-ID";
/// Header identifying a guest session.
pub const SESSION_ID_HEADER: &str = "X-SESSION-ID";

/// Builds the outbound HTTP client shared by one collaborator.
pub(crate) fn http_client(config: &HttpClientConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| CheckoutError::Upstream(format!("failed to build http client: {e}")))
}

/// Joins a base URL and a path without doubling the slash.
pub(crate) fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Reads the `error` field of a JSON error body, falling back to the raw text.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("status {status}: {body}"))
}
