//! Application state.

use std::sync::Arc;

use depot_service::{CatalogService, OrderService, RobotService, ServiceConfig};
use depot_store::OrderStore;

/// Shared application state, generic over the store backend.
pub struct AppState<S> {
    /// Product catalog.
    pub catalog: CatalogService<S>,

    /// Checkout and order history.
    pub orders: OrderService<S>,

    /// Delivery planning and status transitions.
    pub robots: RobotService<S>,
}

impl<S: OrderStore> AppState<S> {
    /// Create the services over one shared store.
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        Self {
            catalog: CatalogService::new(store.clone()),
            orders: OrderService::new(store.clone()),
            robots: RobotService::new(store, config),
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            orders: self.orders.clone(),
            robots: self.robots.clone(),
        }
    }
}
