//! Robot-facing operations: delivery planning and status transitions.

use std::sync::Arc;

use depot_core::{DeliveryPlan, DepotError, OrderId, OrderStatus, Result};
use depot_planner::{Deadline, KnapsackPlanner};
use depot_store::{OrderRepository, OrderStore};
use tracing::{info, instrument};

use crate::config::ServiceConfig;
use crate::tx::{exec_tx_within, with_timeout};

/// Plans robot runs and moves orders through their statuses.
pub struct RobotService<S> {
    store: Arc<S>,
    planner: Arc<KnapsackPlanner>,
    config: ServiceConfig,
}

impl<S> Clone for RobotService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            planner: self.planner.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: OrderStore> RobotService<S> {
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        let planner = Arc::new(KnapsackPlanner::with_config(config.planner.clone()));
        Self {
            store,
            planner,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Pick the most valuable set of waiting orders that fits into the robot
    /// and assign them to it.
    ///
    /// Runs in one transaction: fetch every `shipping` order, plan, then mark
    /// the selected orders `delivering`. Other planning calls wait for this
    /// one to commit, so an order is never handed to two robots. When the
    /// configured timeout passes first, whether waiting for the store or
    /// while planning, nothing is changed and the call fails with
    /// [`DepotError::Timeout`].
    #[instrument(skip(self))]
    pub async fn generate_delivery_plan(&self, robot_id: &str, capacity: i64) -> Result<DeliveryPlan> {
        let capacity = u64::try_from(capacity).map_err(|_| {
            DepotError::InvalidInput(format!("capacity must not be negative, got {}", capacity))
        })?;

        let budget = self.config.plan_timeout();
        let deadline = Deadline::after(budget);
        let planner = self.planner.clone();

        let planned = exec_tx_within(self.store.as_ref(), budget, "delivery planning", |tx| async move {
            let candidates = tx.awaiting_orders().await?;
            let candidate_count = candidates.len();

            let mut selection = tokio::task::spawn_blocking(move || {
                planner.select(&candidates, capacity, &deadline)
            })
            .await
            .map_err(|e| DepotError::Internal(format!("planner task failed: {}", e)))??;

            if !selection.is_empty() {
                let order_ids: Vec<OrderId> = selection.items.iter().map(|o| o.order_id).collect();
                tx.update_statuses(&order_ids, OrderStatus::Delivering).await?;
                for order in &mut selection.items {
                    order.shipped_status = OrderStatus::Delivering;
                }
            }
            Ok((selection, candidate_count))
        })
        .await;

        let (selection, candidate_count) = planned.map_err(|e| match e {
            DepotError::Cancelled { message } => DepotError::Timeout {
                duration_ms: budget.as_millis() as u64,
                message,
            },
            // Another connection kept the database locked past the budget.
            e if e.is_busy() => DepotError::Timeout {
                duration_ms: budget.as_millis() as u64,
                message: e.to_string(),
            },
            other => other,
        })?;

        info!(
            "Robot {} assigned {} of {} waiting orders (weight {}/{}, value {})",
            robot_id,
            selection.items.len(),
            candidate_count,
            selection.total_weight,
            capacity,
            selection.total_value
        );

        Ok(DeliveryPlan {
            robot_id: robot_id.to_string(),
            total_weight: selection.total_weight,
            total_value: selection.total_value,
            orders: selection.items,
        })
    }

    /// Move a single order to `status`, outside any planning transaction.
    #[instrument(skip(self))]
    pub async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let store = self.store.as_ref();
        with_timeout(self.config.plan_timeout(), "order status update", async move {
            let updated = store.update_statuses(&[order_id], status).await?;
            if updated == 0 {
                return Err(DepotError::not_found("Order", order_id));
            }
            Ok(())
        })
        .await?;

        info!("Order {} is now {}", order_id, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{OrderLine, Product};
    use depot_planner::PlannerConfig;
    use depot_store::{InMemoryStore, ProductRepository, SqliteStore, Transaction};
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    use crate::orders::OrderService;

    fn catalog() -> Vec<Product> {
        // (weight, value) pairs of the classic four-item example.
        [(2, 3), (3, 4), (4, 5), (5, 6)]
            .into_iter()
            .enumerate()
            .map(|(i, (weight, value))| Product {
                product_id: i as i64 + 1,
                name: format!("Item {}", i + 1),
                value,
                weight,
                image: String::new(),
                description: String::new(),
            })
            .collect()
    }

    async fn seeded_memory() -> (Arc<InMemoryStore>, Vec<OrderId>) {
        let store = Arc::new(InMemoryStore::with_products(catalog()));
        let orders = OrderService::new(store.clone());
        // One request per product so ids follow catalog order.
        let mut ids = Vec::new();
        for product_id in 1..=4 {
            ids.extend(
                orders
                    .create_orders(1, &[OrderLine::new(product_id, 1)])
                    .await
                    .unwrap(),
            );
        }
        (store, ids)
    }

    /// Catalog plus one order per product, created in catalog order.
    async fn seed<S: OrderStore>(store: Arc<S>) -> Vec<OrderId> {
        for product in catalog() {
            store.insert_product(&product).await.unwrap();
        }
        let orders = OrderService::new(store);
        let mut ids = Vec::new();
        for product_id in 1..=4 {
            ids.extend(
                orders
                    .create_orders(1, &[OrderLine::new(product_id, 1)])
                    .await
                    .unwrap(),
            );
        }
        ids
    }

    #[tokio::test]
    async fn test_plan_assigns_selected_orders() {
        let (store, ids) = seeded_memory().await;
        let robots = RobotService::new(store.clone(), ServiceConfig::default());

        let plan = robots.generate_delivery_plan("robot-1", 5).await.unwrap();
        assert_eq!(plan.robot_id, "robot-1");
        assert_eq!(plan.total_value, 7);
        assert_eq!(plan.total_weight, 5);
        assert_eq!(plan.order_ids(), vec![ids[0], ids[1]]);
        assert!(plan.orders.iter().all(|o| o.shipped_status == OrderStatus::Delivering));

        let awaiting: Vec<OrderId> = store
            .awaiting_orders()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(awaiting, vec![ids[2], ids[3]]);
        for id in plan.order_ids() {
            let order = store.get_order(id).await.unwrap().unwrap();
            assert_eq!(order.shipped_status, OrderStatus::Delivering);
        }
    }

    #[tokio::test]
    async fn test_capacity_above_total_takes_everything() {
        let (store, ids) = seeded_memory().await;
        let robots = RobotService::new(store.clone(), ServiceConfig::default());

        let plan = robots.generate_delivery_plan("robot-1", 100).await.unwrap();
        assert_eq!(plan.order_ids(), ids);
        assert_eq!(plan.total_weight, 14);
        assert!(store.awaiting_orders().await.unwrap().is_empty());

        let next = robots.generate_delivery_plan("robot-2", 100).await.unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_degenerate_and_invalid_capacity() {
        let (store, _) = seeded_memory().await;
        let robots = RobotService::new(store.clone(), ServiceConfig::default());

        let plan = robots.generate_delivery_plan("robot-1", 0).await.unwrap();
        assert_eq!(plan, DeliveryPlan::empty("robot-1"));

        let err = robots.generate_delivery_plan("robot-1", -1).await.unwrap_err();
        assert!(matches!(err, DepotError::InvalidInput(_)));
        assert_eq!(store.awaiting_orders().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_plans_never_share_orders() {
        let store = Arc::new(InMemoryStore::with_products(catalog()));
        OrderService::new(store.clone())
            .create_orders(1, &[OrderLine::new(1, 10), OrderLine::new(2, 10)])
            .await
            .unwrap();
        let robots = RobotService::new(store.clone(), ServiceConfig::default());

        let mut handles = Vec::new();
        for i in 0..6 {
            let robots = robots.clone();
            handles.push(tokio::spawn(async move {
                robots.generate_delivery_plan(&format!("robot-{}", i), 9).await
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let plan = handle.await.unwrap().unwrap();
            assert!(plan.total_weight <= 9);
            for id in plan.order_ids() {
                assert!(seen.insert(id), "order {} assigned twice", id);
            }
        }
        assert_eq!(seen.len() + store.awaiting_orders().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_expired_deadline_changes_nothing() {
        let (store, _) = seeded_memory().await;
        let config = ServiceConfig {
            plan_timeout_ms: 0,
            planner: PlannerConfig::default(),
        };
        let robots = RobotService::new(store.clone(), config);

        let err = robots.generate_delivery_plan("robot-1", 5).await.unwrap_err();
        assert!(matches!(err, DepotError::Timeout { .. }));
        assert_eq!(store.awaiting_orders().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_plan_too_large_rolls_back() {
        let (store, _) = seeded_memory().await;
        let config = ServiceConfig {
            planner: PlannerConfig {
                checkpoint_interval: 1,
                max_table_cells: 10,
            },
            ..ServiceConfig::default()
        };
        let robots = RobotService::new(store.clone(), config);

        let err = robots.generate_delivery_plan("robot-1", 50).await.unwrap_err();
        assert!(matches!(err, DepotError::PlanTooLarge { .. }));
        assert_eq!(store.awaiting_orders().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_update_order_status() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for product in catalog() {
            store.insert_product(&product).await.unwrap();
        }
        let ids = OrderService::new(store.clone())
            .create_orders(9, &[OrderLine::new(1, 1)])
            .await
            .unwrap();
        let robots = RobotService::new(store.clone(), ServiceConfig::default());

        robots
            .update_order_status(ids[0], OrderStatus::Completed)
            .await
            .unwrap();
        let order = store.get_order(ids[0]).await.unwrap().unwrap();
        assert_eq!(order.shipped_status, OrderStatus::Completed);
        assert!(order.arrived_at.is_some());

        let err = robots
            .update_order_status(999, OrderStatus::Delivering)
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_plan_commits() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for product in catalog() {
            store.insert_product(&product).await.unwrap();
        }
        OrderService::new(store.clone())
            .create_orders(1, &[OrderLine::new(3, 2), OrderLine::new(1, 1)])
            .await
            .unwrap();
        let robots = RobotService::new(store.clone(), ServiceConfig::default());

        let plan = robots.generate_delivery_plan("robot-1", 6).await.unwrap();
        assert_eq!(plan.total_value, 8);
        let remaining = store.awaiting_orders().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!plan.order_ids().contains(&remaining[0].order_id));
    }

    #[tokio::test]
    async fn test_locked_database_is_reported_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depot.db");
        let holder = Arc::new(SqliteStore::open(&path).unwrap());
        let planner_store = Arc::new(SqliteStore::open(&path).unwrap());
        seed(holder.clone()).await;

        let config = ServiceConfig {
            plan_timeout_ms: 100,
            planner: PlannerConfig::default(),
        };
        let robots = RobotService::new(planner_store.clone(), config);

        // Another connection holds the write lock for longer than the budget.
        let held = holder.begin().await.unwrap();
        let started = Instant::now();
        let err = robots.generate_delivery_plan("r", 5).await.unwrap_err();
        let took = started.elapsed();
        assert!(took < Duration::from_secs(1), "planning waited {:?}", took);
        assert!(matches!(err, DepotError::Timeout { .. }), "unexpected error: {err}");
        assert_eq!(planner_store.awaiting_orders().await.unwrap().len(), 4);

        held.rollback().await.unwrap();
        let plan = robots.generate_delivery_plan("r", 5).await.unwrap();
        assert_eq!(plan.total_value, 7);
        assert_eq!(holder.awaiting_orders().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sqlite_plans_never_share_orders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depot.db");
        let first = Arc::new(SqliteStore::open(&path).unwrap());
        let second = Arc::new(SqliteStore::open(&path).unwrap());
        for product in catalog() {
            first.insert_product(&product).await.unwrap();
        }
        OrderService::new(first.clone())
            .create_orders(1, &[OrderLine::new(1, 10), OrderLine::new(2, 10)])
            .await
            .unwrap();

        // Two connections to one file, several planners on each.
        let services = [
            RobotService::new(first.clone(), ServiceConfig::default()),
            RobotService::new(second.clone(), ServiceConfig::default()),
        ];
        let mut handles = Vec::new();
        for i in 0..8 {
            let robots = services[i % 2].clone();
            handles.push(tokio::spawn(async move {
                robots.generate_delivery_plan(&format!("robot-{}", i), 9).await
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let plan = handle.await.unwrap().unwrap();
            assert!(plan.total_weight <= 9);
            for id in plan.order_ids() {
                assert!(seen.insert(id), "order {} assigned twice", id);
            }
        }
        assert_eq!(seen.len() + second.awaiting_orders().await.unwrap().len(), 20);
        for id in seen {
            let order = first.get_order(id).await.unwrap().unwrap();
            assert_eq!(order.shipped_status, OrderStatus::Delivering);
        }
    }

    #[tokio::test]
    async fn test_timeout_during_large_plan_changes_nothing() {
        let products: Vec<Product> = (0..10)
            .map(|i| Product {
                product_id: i + 1,
                name: format!("Pallet {}", i + 1),
                value: 100 + (i as u64 * 37) % 91,
                weight: 50 + i as u64 * 97,
                image: String::new(),
                description: String::new(),
            })
            .collect();
        let store = Arc::new(InMemoryStore::with_products(products));
        let lines: Vec<OrderLine> = (1..=10).map(|product_id| OrderLine::new(product_id, 200)).collect();
        OrderService::new(store.clone()).create_orders(1, &lines).await.unwrap();

        // 2000 rows of 300k cells: far more work than the budget allows.
        let config = ServiceConfig {
            plan_timeout_ms: 150,
            planner: PlannerConfig {
                checkpoint_interval: 1,
                max_table_cells: 1 << 30,
            },
        };
        let robots = RobotService::new(store.clone(), config);

        let started = Instant::now();
        let err = robots.generate_delivery_plan("robot-1", 300_000).await.unwrap_err();
        assert!(matches!(err, DepotError::Timeout { .. }), "unexpected error: {err}");
        assert!(started.elapsed() >= Duration::from_millis(100));

        let awaiting = store.awaiting_orders().await.unwrap();
        assert_eq!(awaiting.len(), 2000);
        assert!(awaiting.iter().all(|o| o.shipped_status == OrderStatus::Shipping));
    }
}
