//! Order preparation, lookup and internal transition endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use common::OrderId;
use domain::{Order, OrderStatus};
use saga::services::TransitionResponse;
use saga::{PreparedOrder, Transition, Viewer};
use serde::Deserialize;
use storage::{OrderFilter, OrderPage};

use crate::auth::{Identity, InternalCaller, is_internal};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// POST /v1/orders/prepare: turn the caller's cart into a reserved order.
#[tracing::instrument(skip(state))]
pub async fn prepare(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<(StatusCode, Json<PreparedOrder>), ApiError> {
    let prepared = state
        .orders
        .prepare_order(identity.user_id, identity.session_id)
        .await?;
    Ok((StatusCode::CREATED, Json(prepared)))
}

/// GET /v1/orders/{id}: visible to the owning user or an internal caller.
#[tracing::instrument(skip(state, headers))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    identity: Identity,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let viewer = if is_internal(&headers, &state) {
        Viewer::Internal
    } else if let Some(user_id) = identity.user_id {
        Viewer::User(user_id)
    } else {
        Viewer::Anonymous
    };

    let order = state.orders.get_order(order_id, &viewer).await?;
    Ok(Json(order))
}

/// GET /v1/orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id = identity
        .user_id
        .ok_or_else(|| ApiError::BadRequest("X-USER-ID header is required".to_string()))?;
    Ok(Json(state.orders.list_for_user(&user_id).await?))
}

/// GET /v1/admin/orders: paginated listing for operators.
#[tracing::instrument(skip(state, _caller))]
pub async fn admin_list(
    _caller: InternalCaller,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderPage>, ApiError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = OrderFilter::new(status, query.page, query.limit);
    Ok(Json(state.orders.list(filter).await?))
}

/// POST /v1/orders/{id}/paid: deduct stock and mark the order paid.
#[tracing::instrument(skip(state, _caller))]
pub async fn mark_paid(
    _caller: InternalCaller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let result = state.orders.mark_paid(order_id).await?;
    Ok(transition_response(order_id, result))
}

/// POST /v1/orders/{id}/release: return stock and cancel an unpaid order.
#[tracing::instrument(skip(state, _caller))]
pub async fn release(
    _caller: InternalCaller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let result = state.orders.release(order_id).await?;
    Ok(transition_response(order_id, result))
}

/// POST /v1/orders/{id}/refund: return stock and mark a paid order refunded.
#[tracing::instrument(skip(state, _caller))]
pub async fn refund(
    _caller: InternalCaller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let result = state.orders.refund(order_id).await?;
    Ok(transition_response(order_id, result))
}

fn transition_response(order_id: OrderId, result: Transition) -> Json<TransitionResponse> {
    Json(TransitionResponse { order_id, result })
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
