//! Catalog endpoints.

use axum::extract::{Query, State};
use axum::Json;
use depot_core::{Page, Product, ProductQuery};
use depot_store::OrderStore;

use super::error::{error_response, ApiResult};
use crate::state::AppState;

/// List catalog products.
pub async fn list_products<S: OrderStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Json<Page<Product>>> {
    let page = state
        .catalog
        .list_products(&query)
        .await
        .map_err(error_response)?;
    Ok(Json(page))
}
