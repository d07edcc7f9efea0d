//! Inventory RPC served to the order side when the ledger is local.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::ProductId;
use serde::Deserialize;
use storage::{InventoryError, StockLevel};

use crate::auth::AdminCaller;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub available: i64,
}

/// POST /v1/admin/products/{id}/{op}: reserve, deduct, release or restock.
#[tracing::instrument(skip(state, _caller))]
pub async fn apply(
    _caller: AdminCaller,
    State(state): State<Arc<AppState>>,
    Path((product_id, op)): Path<(String, String)>,
    Json(req): Json<QuantityRequest>,
) -> Result<Json<StockLevel>, ApiError> {
    let product_id = ProductId::new(product_id);
    let quantity = u32::try_from(req.quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or(InventoryError::InvalidQuantity(req.quantity))?;

    let ledger = &state.ledger;
    match op.as_str() {
        "reserve" => ledger.reserve(&product_id, quantity).await?,
        "deduct" => ledger.deduct(&product_id, quantity).await?,
        "release" => ledger.release(&product_id, quantity).await?,
        "restock" => ledger.restock(&product_id, quantity).await?,
        other => return Err(ApiError::NotFound(format!("Unknown operation {other}"))),
    }

    Ok(Json(ledger.stock(&product_id).await?))
}

/// GET /v1/admin/products/{id}/stock
#[tracing::instrument(skip(state, _caller))]
pub async fn stock(
    _caller: AdminCaller,
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockLevel>, ApiError> {
    Ok(Json(state.ledger.stock(&ProductId::new(product_id)).await?))
}

/// PUT /v1/admin/products/{id}/stock: seed the available counter.
#[tracing::instrument(skip(state, _caller))]
pub async fn set_stock(
    _caller: AdminCaller,
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockLevel>, ApiError> {
    if req.available < 0 {
        return Err(InventoryError::InvalidQuantity(req.available).into());
    }
    let level = state
        .ledger
        .set_available(&ProductId::new(product_id), req.available)
        .await?;
    Ok(Json(level))
}
