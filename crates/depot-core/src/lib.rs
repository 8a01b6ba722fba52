//! # Depot Core
//!
//! Core domain types for the Depot fulfilment service.
//!
//! This crate provides the fundamental building blocks:
//! - [`Order`] - One indivisible unit of one product, with its shipping status
//! - [`Product`] - Catalog entry orders are created from
//! - [`DeliveryPlan`] - Orders selected for one robot run
//! - [`DepotError`] - Service error types

pub mod error;
pub mod order;
pub mod query;
pub mod types;

// Re-exports for convenience
pub use error::{DepotError, Result};
pub use order::{DeliveryPlan, Order, OrderLine, OrderSummary, Product};
pub use query::{
    ListQuery, MatchMode, OrderQuery, OrderSortField, Page, ProductQuery, ProductSortField,
    SortOrder,
};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{DepotError, Result};
    pub use crate::order::{DeliveryPlan, Order, OrderLine, OrderSummary, Product};
    pub use crate::query::{OrderQuery, Page, ProductQuery};
    pub use crate::types::{OrderId, OrderStatus, ProductId, UserId};
}
