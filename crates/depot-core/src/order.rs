//! Orders, products and delivery plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OrderId, OrderStatus, ProductId, UserId};

/// A single indivisible order: one unit of one product.
///
/// Weight and value are copied from the catalog when the order is created
/// and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Store-assigned identifier.
    pub order_id: OrderId,

    /// Customer who placed the order.
    pub user_id: UserId,

    /// Ordered product.
    pub product_id: ProductId,

    /// Weight snapshot taken at creation.
    pub weight: u64,

    /// Value snapshot taken at creation.
    pub value: u64,

    /// Current shipping status.
    pub shipped_status: OrderStatus,

    /// Timestamp when the order was placed.
    pub created_at: DateTime<Utc>,

    /// Timestamp when the order reached the customer.
    pub arrived_at: Option<DateTime<Utc>>,
}

/// One line of a checkout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Row of a user's order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub shipped_status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub arrived_at: Option<DateTime<Utc>>,
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub value: u64,
    pub weight: u64,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub description: String,
}

/// Orders selected for one robot run.
///
/// Never persisted; the only durable trace of a plan is the status of the
/// orders it assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPlan {
    /// Robot the plan was generated for.
    pub robot_id: String,

    /// Sum of the selected orders' weights. Never exceeds the robot capacity.
    pub total_weight: u64,

    /// Sum of the selected orders' values.
    pub total_value: u64,

    /// Selected orders, in candidate order.
    pub orders: Vec<Order>,
}

impl DeliveryPlan {
    /// A plan that carries nothing.
    pub fn empty(robot_id: impl Into<String>) -> Self {
        Self {
            robot_id: robot_id.into(),
            total_weight: 0,
            total_value: 0,
            orders: Vec::new(),
        }
    }

    /// Identifiers of the selected orders.
    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|o| o.order_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_plan() {
        let plan = DeliveryPlan::empty("robot-1");
        assert!(plan.is_empty());
        assert_eq!(plan.total_weight, 0);
        assert_eq!(plan.total_value, 0);
        assert!(plan.order_ids().is_empty());
    }

    #[test]
    fn test_product_defaults_optional_fields() {
        let product: Product = serde_json::from_str(
            r#"{"product_id": 1, "name": "Desk lamp", "value": 30, "weight": 2}"#,
        )
        .unwrap();
        assert_eq!(product.image, "");
        assert_eq!(product.description, "");
    }
}
