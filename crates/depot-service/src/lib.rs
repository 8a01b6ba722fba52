//! # Depot Service
//!
//! Fulfilment services on top of an [`OrderStore`](depot_store::OrderStore):
//!
//! - [`OrderService`] - Checkout: creates one order per requested unit in a single transaction
//! - [`RobotService`] - Delivery planning and order status transitions
//! - [`CatalogService`] - Product listing

pub mod catalog;
pub mod config;
pub mod orders;
pub mod robot;
pub mod tx;

pub use catalog::CatalogService;
pub use config::ServiceConfig;
pub use orders::OrderService;
pub use robot::RobotService;
pub use tx::{exec_tx, exec_tx_within, with_timeout};
