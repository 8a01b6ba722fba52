//! Robot endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use depot_core::{DeliveryPlan, OrderId, OrderStatus};
use depot_store::OrderStore;
use serde::Deserialize;

use super::error::{error_response, ApiResult};
use crate::state::AppState;

/// Request for a new delivery plan.
#[derive(Debug, Deserialize)]
pub struct DeliveryPlanRequest {
    pub robot_id: String,
    /// Signed so that a negative capacity reaches the service and is rejected there.
    pub capacity: i64,
}

/// Request to move one order to a new status.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub order_id: OrderId,
    pub new_status: String,
}

/// Assign waiting orders to a robot.
pub async fn generate_delivery_plan<S: OrderStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<DeliveryPlanRequest>,
) -> ApiResult<Json<DeliveryPlan>> {
    let plan = state
        .robots
        .generate_delivery_plan(&req.robot_id, req.capacity)
        .await
        .map_err(error_response)?;
    Ok(Json(plan))
}

/// Update the status of a single order.
pub async fn update_order_status<S: OrderStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<StatusCode> {
    let status: OrderStatus = req.new_status.parse().map_err(error_response)?;
    state
        .robots
        .update_order_status(req.order_id, status)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
