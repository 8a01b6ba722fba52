//! Checkout and order history endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use depot_core::{Order, OrderId, OrderLine, OrderQuery, OrderSummary, Page, UserId};
use depot_store::OrderStore;
use serde::{Deserialize, Serialize};

use super::error::{error_response, ApiResult};
use crate::state::AppState;

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CreateOrdersRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrdersResponse {
    pub order_ids: Vec<OrderId>,
}

/// Create one order per requested unit.
pub async fn create_orders<S: OrderStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateOrdersRequest>,
) -> ApiResult<(StatusCode, Json<CreateOrdersResponse>)> {
    let order_ids = state
        .orders
        .create_orders(req.user_id, &req.items)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(CreateOrdersResponse { order_ids })))
}

/// A user's order history.
pub async fn list_user_orders<S: OrderStore>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Page<OrderSummary>>> {
    let page = state
        .orders
        .list_orders(user_id, &query)
        .await
        .map_err(error_response)?;
    Ok(Json(page))
}

/// Get an order by ID.
pub async fn get_order<S: OrderStore>(
    State(state): State<AppState<S>>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<Json<Order>> {
    let order = state
        .orders
        .get_order(order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(order))
}
