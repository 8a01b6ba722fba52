//! Common types used across the Depot service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DepotError;

/// Store-assigned order identifier.
pub type OrderId = i64;

/// Catalog product identifier.
pub type ProductId = i64;

/// Customer identifier.
pub type UserId = i64;

/// Shipping status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed and waiting for a robot to pick it up.
    #[serde(alias = "awaiting")]
    Shipping,
    /// Assigned to a robot by a delivery plan.
    #[serde(alias = "assigned")]
    Delivering,
    /// Handed over to the customer.
    #[serde(alias = "delivered")]
    Completed,
}

impl OrderStatus {
    /// Wire and storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Completed => "completed",
        }
    }

    /// Returns true if the order is a candidate for delivery planning.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, OrderStatus::Shipping)
    }

    /// Returns true if the order has reached the customer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shipping" | "awaiting" => Ok(OrderStatus::Shipping),
            "delivering" | "assigned" => Ok(OrderStatus::Delivering),
            "completed" | "delivered" => Ok(OrderStatus::Completed),
            other => Err(DepotError::InvalidInput(format!(
                "unknown order status '{}'",
                other
            ))),
        }
    }
}
