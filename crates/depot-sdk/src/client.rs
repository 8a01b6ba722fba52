//! Depot client implementation.

use depot_core::{
    DeliveryPlan, DepotError, Order, OrderId, OrderLine, OrderQuery, OrderStatus, OrderSummary,
    Page, Product, ProductQuery, Result, UserId,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client for interacting with a Depot node.
#[derive(Clone)]
pub struct DepotClient {
    /// Base URL of the Depot node.
    base_url: String,

    /// HTTP client.
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateOrdersRequest<'a> {
    user_id: UserId,
    items: &'a [OrderLine],
}

#[derive(Debug, Deserialize)]
struct CreateOrdersResponse {
    order_ids: Vec<OrderId>,
}

#[derive(Debug, Serialize)]
struct DeliveryPlanRequest<'a> {
    robot_id: &'a str,
    capacity: i64,
}

#[derive(Debug, Serialize)]
struct UpdateStatusRequest {
    order_id: OrderId,
    new_status: OrderStatus,
}

fn connection_error(err: reqwest::Error) -> DepotError {
    DepotError::ConnectionError(err.to_string())
}

/// Error for a non-success response. `resource` names what a 404 refers to;
/// an empty id means the node's message identifies it instead.
fn status_error(status: StatusCode, body: String, resource: (&str, String)) -> DepotError {
    match status {
        StatusCode::NOT_FOUND => DepotError::NotFound {
            resource_type: resource.0.to_string(),
            id: if resource.1.is_empty() { body } else { resource.1 },
        },
        StatusCode::BAD_REQUEST => DepotError::InvalidInput(body),
        StatusCode::GATEWAY_TIMEOUT => DepotError::Timeout {
            duration_ms: 0,
            message: body,
        },
        other => DepotError::Internal(format!("node returned {}: {}", other, body)),
    }
}

async fn check(response: Response, resource: (&str, String)) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("Request failed with {}: {}", status, body);
    Err(status_error(status, body, resource))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| DepotError::SerializationError(e.to_string()))
}

impl DepotClient {
    /// Connect to a Depot node.
    pub async fn connect(url: &str) -> Result<Self> {
        let base_url = url.trim_end_matches('/').to_string();
        let http_client = reqwest::Client::new();

        // Verify connection with health check
        let health_url = format!("{}/health", base_url);
        http_client
            .get(&health_url)
            .send()
            .await
            .map_err(connection_error)?
            .error_for_status()
            .map_err(connection_error)?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One page of the catalog.
    pub async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let response = self
            .http_client
            .get(self.url("/api/v1/products"))
            .query(query)
            .send()
            .await
            .map_err(connection_error)?;

        decode(check(response, ("Products", String::new())).await?).await
    }

    /// Place an order; returns one id per created order, ascending.
    pub async fn create_orders(&self, user_id: UserId, items: &[OrderLine]) -> Result<Vec<OrderId>> {
        let response = self
            .http_client
            .post(self.url("/api/v1/orders"))
            .json(&CreateOrdersRequest { user_id, items })
            .send()
            .await
            .map_err(connection_error)?;

        let created: CreateOrdersResponse =
            decode(check(response, ("Product", String::new())).await?).await?;
        Ok(created.order_ids)
    }

    /// One page of a user's order history.
    pub async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
        let response = self
            .http_client
            .get(self.url(&format!("/api/v1/users/{}/orders", user_id)))
            .query(query)
            .send()
            .await
            .map_err(connection_error)?;

        decode(check(response, ("User", user_id.to_string())).await?).await
    }

    /// Get an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let response = self
            .http_client
            .get(self.url(&format!("/api/v1/orders/{}", order_id)))
            .send()
            .await
            .map_err(connection_error)?;

        decode(check(response, ("Order", order_id.to_string())).await?).await
    }

    /// Ask the node to assign waiting orders to this robot.
    pub async fn generate_delivery_plan(&self, robot_id: &str, capacity: i64) -> Result<DeliveryPlan> {
        let response = self
            .http_client
            .post(self.url("/api/v1/robot/delivery-plan"))
            .json(&DeliveryPlanRequest { robot_id, capacity })
            .send()
            .await
            .map_err(connection_error)?;

        decode(check(response, ("Robot", robot_id.to_string())).await?).await
    }

    /// Move one order to a new status.
    pub async fn update_order_status(&self, order_id: OrderId, new_status: OrderStatus) -> Result<()> {
        let response = self
            .http_client
            .patch(self.url("/api/v1/robot/orders/status"))
            .json(&UpdateStatusRequest {
                order_id,
                new_status,
            })
            .send()
            .await
            .map_err(connection_error)?;

        check(response, ("Order", order_id.to_string())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = status_error(StatusCode::NOT_FOUND, String::new(), ("Order", "9".into()));
        assert!(matches!(err, DepotError::NotFound { ref id, .. } if id == "9"));

        // Checkout cannot tell which product was missing; the node's message can.
        let err = status_error(
            StatusCode::NOT_FOUND,
            "Order creation failed for product 77: Resource not found: Product with id 77".into(),
            ("Product", String::new()),
        );
        assert!(matches!(
            err,
            DepotError::NotFound { ref resource_type, ref id } if resource_type == "Product" && id.contains("product 77")
        ));

        let err = status_error(StatusCode::GATEWAY_TIMEOUT, "too slow".into(), ("Robot", "r1".into()));
        assert!(err.is_deadline_exceeded());

        let err = status_error(StatusCode::BAD_REQUEST, "bad status".into(), ("Order", "1".into()));
        assert!(matches!(err, DepotError::InvalidInput(ref m) if m == "bad status"));

        let err = status_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Store error: disk I/O error".into(),
            ("Order", "1".into()),
        );
        assert!(matches!(err, DepotError::Internal(ref m) if m.contains("disk I/O error")));
    }

    #[test]
    fn test_status_request_uses_wire_names() {
        let body = serde_json::to_value(UpdateStatusRequest {
            order_id: 3,
            new_status: OrderStatus::Completed,
        })
        .unwrap();
        assert_eq!(body["new_status"], "completed");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is not served in test environments.
        let err = DepotClient::connect("http://127.0.0.1:9/").await.err().unwrap();
        assert!(matches!(err, DepotError::ConnectionError(_)));
    }
}
