//! Order creation and history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use depot_core::{
    DepotError, Order, OrderId, OrderLine, OrderQuery, OrderSummary, Page, ProductId, Result,
    UserId,
};
use depot_store::{OrderRepository, OrderStore, Transaction};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::tx::exec_tx;

/// Checkout and order history.
pub struct OrderService<S> {
    store: Arc<S>,
}

impl<S> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: OrderStore> OrderService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create one order per requested unit, all in one transaction.
    ///
    /// Lines with a non-positive quantity are dropped and repeated products
    /// are merged. Each distinct product is inserted by its own task; the
    /// first failure is reported as [`DepotError::OrderCreationFailed`] and
    /// nothing from the request is kept. Returned ids are ascending.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn create_orders(&self, user_id: UserId, lines: &[OrderLine]) -> Result<Vec<OrderId>> {
        let requested = merge_lines(lines);
        if requested.is_empty() {
            debug!("Nothing to order for user {}", user_id);
            return Ok(Vec::new());
        }

        let order_ids = exec_tx(self.store.as_ref(), |tx| fan_out(tx, user_id, requested)).await?;
        info!("Created {} orders for user {}", order_ids.len(), user_id);
        Ok(order_ids)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DepotError::not_found("Order", order_id))
    }

    /// One page of a user's order history.
    pub async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
        self.store.list_orders(user_id, query).await
    }
}

/// Positive lines only, one per product, in first-appearance order.
fn merge_lines(lines: &[OrderLine]) -> Vec<OrderLine> {
    let mut merged: Vec<OrderLine> = Vec::new();
    let mut index: HashMap<ProductId, usize> = HashMap::new();

    for line in lines.iter().filter(|l| l.quantity > 0) {
        match index.get(&line.product_id) {
            Some(&i) => {
                merged[i].quantity = merged[i].quantity.saturating_add(line.quantity);
            }
            None => {
                index.insert(line.product_id, merged.len());
                merged.push(*line);
            }
        }
    }
    merged
}

/// Spawn one unit per product and reduce their results.
///
/// Units report over a channel to this single reducer, which keeps the first
/// error and raises `failed` so that the remaining units stop inserting.
/// Returns only after every unit has finished with the transaction.
async fn fan_out<T: Transaction>(tx: T, user_id: UserId, requested: Vec<OrderLine>) -> Result<Vec<OrderId>> {
    let failed = Arc::new(AtomicBool::new(false));
    let (sender, mut results) = mpsc::unbounded_channel();
    let mut units = JoinSet::new();

    for line in requested {
        let tx = tx.clone();
        let failed = failed.clone();
        let sender = sender.clone();
        units.spawn(async move {
            let outcome = create_unit(&tx, user_id, line, &failed).await;
            // The reducer outlives every unit.
            let _ = sender.send((line.product_id, outcome));
        });
    }
    drop(sender);

    let mut order_ids = Vec::new();
    let mut first_error: Option<DepotError> = None;
    while let Some((product_id, outcome)) = results.recv().await {
        match outcome {
            Ok(ids) => order_ids.extend(ids),
            Err(e) if first_error.is_none() => {
                warn!("Order creation for product {} failed: {}", product_id, e);
                failed.store(true, Ordering::Release);
                first_error = Some(DepotError::OrderCreationFailed {
                    product_id,
                    source: Box::new(e),
                });
            }
            Err(e) => debug!("Discarding later failure for product {}: {}", product_id, e),
        }
    }

    while let Some(joined) = units.join_next().await {
        if let Err(e) = joined {
            if first_error.is_none() {
                first_error = Some(DepotError::Internal(format!("order creation task failed: {}", e)));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            order_ids.sort_unstable();
            Ok(order_ids)
        }
    }
}

async fn create_unit<R: OrderRepository>(
    repo: &R,
    user_id: UserId,
    line: OrderLine,
    failed: &AtomicBool,
) -> Result<Vec<OrderId>> {
    let mut ids = Vec::new();
    for _ in 0..line.quantity {
        if failed.load(Ordering::Acquire) {
            return Err(DepotError::Cancelled {
                message: format!("another product failed; stopped product {}", line.product_id),
            });
        }
        ids.push(repo.insert_order(user_id, line.product_id).await?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{OrderStatus, Product};
    use depot_store::{InMemoryStore, ProductRepository, SqliteStore};
    use std::collections::HashSet;
    use std::time::Duration;

    fn product(product_id: ProductId, weight: u64, value: u64) -> Product {
        Product {
            product_id,
            name: format!("Product {}", product_id),
            value,
            weight,
            image: String::new(),
            description: String::new(),
        }
    }

    fn memory_service() -> (Arc<InMemoryStore>, OrderService<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::with_products([product(1, 2, 10), product(2, 5, 30)]));
        (store.clone(), OrderService::new(store))
    }

    #[test]
    fn test_merge_lines() {
        let merged = merge_lines(&[
            OrderLine::new(2, 1),
            OrderLine::new(1, 0),
            OrderLine::new(1, -3),
            OrderLine::new(2, 2),
            OrderLine::new(3, 1),
        ]);
        assert_eq!(merged, vec![OrderLine::new(2, 3), OrderLine::new(3, 1)]);
    }

    #[tokio::test]
    async fn test_two_products_yield_five_orders() {
        let (store, service) = memory_service();
        let ids = service
            .create_orders(42, &[OrderLine::new(1, 2), OrderLine::new(2, 3)])
            .await
            .unwrap();

        assert_eq!(ids.len(), 5);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let mut per_product = HashMap::new();
        for id in &ids {
            let order = store.get_order(*id).await.unwrap().unwrap();
            assert_eq!(order.user_id, 42);
            assert_eq!(order.shipped_status, OrderStatus::Shipping);
            *per_product.entry(order.product_id).or_insert(0) += 1;
        }
        assert_eq!(per_product[&1], 2);
        assert_eq!(per_product[&2], 3);
    }

    #[tokio::test]
    async fn test_empty_request_skips_store() {
        let (store, service) = memory_service();
        // Hold the writer gate: any attempt to open a transaction would block.
        let held = store.begin().await.unwrap();

        let ids = tokio::time::timeout(
            Duration::from_millis(200),
            service.create_orders(1, &[OrderLine::new(1, 0), OrderLine::new(2, -1)]),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(ids.is_empty());
        drop(held);

        assert!(service.create_orders(1, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_product_discards_batch() {
        let (store, service) = memory_service();
        let err = service
            .create_orders(7, &[OrderLine::new(1, 3), OrderLine::new(99, 1)])
            .await
            .unwrap_err();

        match err {
            DepotError::OrderCreationFailed { product_id, source } => {
                assert_eq!(product_id, 99);
                assert!(matches!(*source, DepotError::NotFound { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.awaiting_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_on_second_unit_rolls_back_everything() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.insert_product(&product(1, 2, 10)).await.unwrap();
        store.insert_product(&product(2, 5, 30)).await.unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER fail_second_unit BEFORE INSERT ON orders
                 WHEN NEW.product_id = 1
                  AND (SELECT COUNT(*) FROM orders WHERE product_id = 1) >= 1
                 BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
            )
            .await
            .unwrap();

        let service = OrderService::new(store.clone());
        let err = service
            .create_orders(3, &[OrderLine::new(1, 2), OrderLine::new(2, 3)])
            .await
            .unwrap_err();

        match err {
            DepotError::OrderCreationFailed { product_id, source } => {
                assert_eq!(product_id, 1);
                assert!(source.to_string().contains("forced failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.awaiting_orders().await.unwrap().is_empty());
        assert_eq!(service.list_orders(3, &OrderQuery::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_get_order_and_history() {
        let (_store, service) = memory_service();
        let ids = service.create_orders(5, &[OrderLine::new(2, 2)]).await.unwrap();

        let order = service.get_order(ids[0]).await.unwrap();
        assert_eq!((order.weight, order.value), (5, 30));
        assert!(matches!(
            service.get_order(12345).await.unwrap_err(),
            DepotError::NotFound { .. }
        ));

        let history = service.list_orders(5, &OrderQuery::default()).await.unwrap();
        assert_eq!(history.total, 2);
        assert_eq!(history.data[0].product_name, "Product 2");
    }
}
