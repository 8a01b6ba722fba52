//! In-memory order store.
//!
//! Transactions work on a private copy of the tables taken at `begin` and
//! swap it in on commit. A single writer gate keeps transactions (and direct
//! writes) from overlapping, so the copy never goes stale.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{
    DepotError, MatchMode, Order, OrderId, OrderQuery, OrderSortField, OrderStatus, OrderSummary,
    Page, Product, ProductId, ProductQuery, ProductSortField, Result, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::store::{OrderRepository, OrderStore, ProductRepository, Transaction};

/// Catalog and order rows.
#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    /// Last order id handed out.
    last_order_id: OrderId,
}

impl Tables {
    fn insert_order(&mut self, user_id: UserId, product_id: ProductId) -> Result<OrderId> {
        let product = self
            .products
            .get(&product_id)
            .ok_or_else(|| DepotError::not_found("Product", product_id))?;

        self.last_order_id += 1;
        let order = Order {
            order_id: self.last_order_id,
            user_id,
            product_id,
            weight: product.weight,
            value: product.value,
            shipped_status: OrderStatus::Shipping,
            created_at: Utc::now(),
            arrived_at: None,
        };
        self.orders.insert(order.order_id, order);
        Ok(self.last_order_id)
    }

    fn awaiting_orders(&self) -> Vec<Order> {
        // BTreeMap iteration is already ascending by order id.
        self.orders
            .values()
            .filter(|o| o.shipped_status.is_awaiting())
            .cloned()
            .collect()
    }

    fn update_statuses(&mut self, order_ids: &[OrderId], status: OrderStatus, now: DateTime<Utc>) -> usize {
        let unique: BTreeSet<OrderId> = order_ids.iter().copied().collect();
        let mut updated = 0;
        for id in unique {
            if let Some(order) = self.orders.get_mut(&id) {
                order.shipped_status = status;
                if status == OrderStatus::Completed {
                    order.arrived_at = Some(now);
                }
                updated += 1;
            }
        }
        updated
    }

    fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Page<OrderSummary> {
        let term = query.search_term().map(str::to_lowercase);

        let mut rows: Vec<OrderSummary> = self
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .filter_map(|o| {
                let product = self.products.get(&o.product_id)?;
                Some(OrderSummary {
                    order_id: o.order_id,
                    product_id: o.product_id,
                    product_name: product.name.clone(),
                    shipped_status: o.shipped_status,
                    created_at: o.created_at,
                    arrived_at: o.arrived_at,
                })
            })
            .filter(|row| match &term {
                None => true,
                Some(term) => {
                    let name = row.product_name.to_lowercase();
                    match query.match_mode {
                        MatchMode::Prefix => name.starts_with(term.as_str()),
                        MatchMode::Partial => name.contains(term.as_str()),
                    }
                }
            })
            .collect();

        // Rows arrive in order id order; a stable sort keeps it as the tiebreak.
        rows.sort_by(|a, b| {
            let ord = match query.sort_field {
                OrderSortField::OrderId => a.order_id.cmp(&b.order_id),
                OrderSortField::ProductName => a.product_name.cmp(&b.product_name),
                OrderSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                OrderSortField::ShippedStatus => {
                    a.shipped_status.as_str().cmp(b.shipped_status.as_str())
                }
                OrderSortField::ArrivedAt => a.arrived_at.cmp(&b.arrived_at),
            };
            if query.sort_order.is_desc() {
                ord.reverse()
            } else {
                ord
            }
        });

        Page::slice(rows, query)
    }

    fn list_products(&self, query: &ProductQuery) -> Page<Product> {
        let term = query.search_term().map(str::to_lowercase);

        let mut rows: Vec<Product> = self
            .products
            .values()
            .filter(|p| match &term {
                None => true,
                Some(term) => {
                    p.name.to_lowercase().contains(term.as_str())
                        || p.description.to_lowercase().contains(term.as_str())
                }
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ord = match query.sort_field {
                ProductSortField::ProductId => a.product_id.cmp(&b.product_id),
                ProductSortField::Name => a.name.cmp(&b.name),
                ProductSortField::Value => a.value.cmp(&b.value),
                ProductSortField::Weight => a.weight.cmp(&b.weight),
            };
            if query.sort_order.is_desc() {
                ord.reverse()
            } else {
                ord
            }
        });

        Page::slice(rows, query)
    }
}

/// In-memory implementation of [`OrderStore`].
#[derive(Clone)]
pub struct InMemoryStore {
    /// Committed state.
    tables: Arc<RwLock<Tables>>,

    /// Held by the open transaction or by a direct write.
    writer: Arc<Mutex<()>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Create a store with a pre-filled catalog.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let tables = Tables {
            products: products.into_iter().map(|p| (p.product_id, p)).collect(),
            ..Tables::default()
        };
        Self {
            tables: Arc::new(RwLock::new(tables)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Run a write against committed state while holding the writer gate.
    async fn write<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R> + Send) -> Result<R> {
        let _gate = self.writer.lock().await;
        let mut tables = self.tables.write().await;
        f(&mut tables)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, user_id: UserId, product_id: ProductId) -> Result<OrderId> {
        self.write(|t| t.insert_order(user_id, product_id)).await
    }

    async fn awaiting_orders(&self) -> Result<Vec<Order>> {
        Ok(self.tables.read().await.awaiting_orders())
    }

    async fn update_statuses(&self, order_ids: &[OrderId], status: OrderStatus) -> Result<usize> {
        if order_ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        self.write(|t| Ok(t.update_statuses(order_ids, status, now))).await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
        Ok(self.tables.read().await.list_orders(user_id, query))
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        let product = product.clone();
        self.write(|t| {
            t.products.insert(product.product_id, product);
            Ok(())
        })
        .await
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&product_id).cloned())
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        Ok(self.tables.read().await.list_products(query))
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let gate = self.writer.clone().lock_owned().await;
        let work = self.tables.read().await.clone();
        debug!("Opened in-memory transaction over {} orders", work.orders.len());

        Ok(MemoryTx {
            inner: Arc::new(MemoryTxInner {
                tables: self.tables.clone(),
                work: StdMutex::new(Some(work)),
                _gate: gate,
            }),
        })
    }
}

/// Transaction over an [`InMemoryStore`].
#[derive(Clone)]
pub struct MemoryTx {
    inner: Arc<MemoryTxInner>,
}

impl std::fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTx").finish_non_exhaustive()
    }
}

struct MemoryTxInner {
    tables: Arc<RwLock<Tables>>,
    /// Private copy; `None` once committed or rolled back.
    work: StdMutex<Option<Tables>>,
    _gate: OwnedMutexGuard<()>,
}

impl MemoryTx {
    fn lock(&self) -> Result<StdMutexGuard<'_, Option<Tables>>> {
        self.inner
            .work
            .lock()
            .map_err(|e| DepotError::store(format!("transaction lock poisoned: {}", e)))
    }

    fn with_work<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R> {
        let mut work = self.lock()?;
        let tables = work.as_mut().ok_or(DepotError::TransactionClosed)?;
        Ok(f(tables))
    }

    fn take_work(&self) -> Result<Tables> {
        self.lock()?.take().ok_or(DepotError::TransactionClosed)
    }
}

#[async_trait]
impl OrderRepository for MemoryTx {
    async fn insert_order(&self, user_id: UserId, product_id: ProductId) -> Result<OrderId> {
        self.with_work(|t| t.insert_order(user_id, product_id))?
    }

    async fn awaiting_orders(&self) -> Result<Vec<Order>> {
        self.with_work(|t| t.awaiting_orders())
    }

    async fn update_statuses(&self, order_ids: &[OrderId], status: OrderStatus) -> Result<usize> {
        let now = Utc::now();
        self.with_work(|t| t.update_statuses(order_ids, status, now))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.with_work(|t| t.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
        self.with_work(|t| t.list_orders(user_id, query))
    }
}

#[async_trait]
impl ProductRepository for MemoryTx {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.with_work(|t| {
            t.products.insert(product.product_id, product.clone());
        })
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.with_work(|t| t.products.get(&product_id).cloned())
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        self.with_work(|t| t.list_products(query))
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self) -> Result<()> {
        let work = self.take_work()?;
        *self.inner.tables.write().await = work;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.take_work().map(drop)
    }
}
