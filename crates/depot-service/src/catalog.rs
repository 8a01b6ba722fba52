//! Product catalog.

use std::sync::Arc;

use depot_core::{DepotError, Page, Product, ProductId, ProductQuery, Result};
use depot_store::OrderStore;
use tracing::info;

/// Read access to the catalog, plus seeding.
pub struct CatalogService<S> {
    store: Arc<S>,
}

impl<S> Clone for CatalogService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: OrderStore> CatalogService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        self.store.list_products(query).await
    }

    pub async fn get_product(&self, product_id: ProductId) -> Result<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DepotError::not_found("Product", product_id))
    }

    /// Insert or replace every product; returns how many were written.
    pub async fn seed(&self, products: &[Product]) -> Result<usize> {
        for product in products {
            self.store.insert_product(product).await?;
        }
        info!("Seeded {} catalog products", products.len());
        Ok(products.len())
    }
}
