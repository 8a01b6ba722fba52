//! Order store traits.
//!
//! The fulfilment services only talk to storage through these traits. Every
//! implementation must give transactions exclusive write access from `begin`
//! until commit or rollback, so that two planning calls never read the same
//! `shipping` orders before one of them has committed its assignments.

use std::time::Duration;

use async_trait::async_trait;
use depot_core::{
    DepotError, Order, OrderId, OrderLine, OrderQuery, OrderStatus, OrderSummary, Page, Product, ProductId,
    ProductQuery, Result, UserId,
};

/// Order rows.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert one `shipping` order for `product_id`, copying the product's
    /// current weight and value into the row.
    async fn insert_order(&self, user_id: UserId, product_id: ProductId) -> Result<OrderId>;

    /// Insert one order per requested unit, line by line.
    ///
    /// Runs inside whatever transaction `self` is; on a bare store each row
    /// commits on its own. Lines with a non-positive quantity are skipped.
    async fn create_orders(&self, user_id: UserId, lines: &[OrderLine]) -> Result<Vec<OrderId>> {
        let mut order_ids = Vec::new();
        for line in lines.iter().filter(|l| l.quantity > 0) {
            for _ in 0..line.quantity {
                order_ids.push(self.insert_order(user_id, line.product_id).await?);
            }
        }
        Ok(order_ids)
    }

    /// All orders still waiting for a robot, in ascending order id.
    async fn awaiting_orders(&self) -> Result<Vec<Order>>;

    /// Set the status of every listed order. Returns the number of orders
    /// changed; an empty list is a successful no-op.
    ///
    /// Moving an order to `completed` stamps its arrival time.
    async fn update_statuses(&self, order_ids: &[OrderId], status: OrderStatus) -> Result<usize>;

    /// Get a single order.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// One page of a user's order history.
    async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>>;
}

/// Product catalog.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Insert or replace a catalog entry.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    /// Get a single product.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// One page of the catalog.
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>>;
}

/// An open unit of work.
///
/// Handles are cheap to clone so that concurrent tasks can write through the
/// same transaction. Once any clone commits or rolls back, every clone fails
/// with `TransactionClosed`. Dropping the last clone of an unfinished
/// transaction rolls it back.
#[async_trait]
pub trait Transaction: OrderRepository + ProductRepository + Clone + 'static {
    /// Make every write of this transaction durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discard every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// A store that can open transactions.
///
/// Direct calls on the store itself are individually atomic.
#[async_trait]
pub trait OrderStore: OrderRepository + ProductRepository + 'static {
    type Tx: Transaction;

    /// Open a transaction, waiting for any other transaction to finish first.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Open a transaction, giving up with [`DepotError::Timeout`] when another
    /// transaction still holds the store after `wait`.
    async fn begin_within(&self, wait: Duration) -> Result<Self::Tx> {
        tokio::time::timeout(wait, self.begin())
            .await
            .map_err(|_| DepotError::Timeout {
                duration_ms: wait.as_millis() as u64,
                message: "store is held by another transaction".to_string(),
            })?
    }
}
