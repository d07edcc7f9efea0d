//! HTTP API server for the checkout saga.
//!
//! Exposes order preparation, payment initiation, the gateway webhook, the
//! internal compensation endpoints and the inventory RPC, with structured
//! logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};
pub use error::{ApiError, StartupError};
pub use state::{AppState, Backends, Components};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/v1/orders", get(routes::orders::list_mine))
        .route("/v1/orders/prepare", post(routes::orders::prepare))
        .route("/v1/orders/{id}", get(routes::orders::get))
        .route("/v1/orders/{id}/paid", post(routes::orders::mark_paid))
        .route("/v1/orders/{id}/release", post(routes::orders::release))
        .route("/v1/orders/{id}/refund", post(routes::orders::refund))
        .route("/v1/admin/orders", get(routes::orders::admin_list))
        .route("/v1/payments/initiate", post(routes::payments::initiate))
        .route(
            "/v1/payments/webhook/razorpay",
            post(routes::payments::razorpay_webhook),
        )
        .route("/v1/payments/{id}", get(routes::payments::get))
        .route(
            "/v1/admin/products/{id}/stock",
            get(routes::inventory::stock).put(routes::inventory::set_stock),
        )
        .route("/v1/admin/products/{id}/{op}", post(routes::inventory::apply))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
