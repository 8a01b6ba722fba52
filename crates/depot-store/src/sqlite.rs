//! SQLite order store.
//!
//! One connection per store. A transaction owns the connection from `begin`
//! until it finishes and runs under `BEGIN IMMEDIATE`, which also keeps other
//! processes sharing the database file from writing in between. Every
//! statement runs on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{
    DepotError, MatchMode, Order, OrderId, OrderQuery, OrderStatus, OrderSummary, Page, Product,
    ProductId, ProductQuery, Result, UserId,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::store::{OrderRepository, OrderStore, ProductRepository, Transaction};

/// How long a statement waits on a lock held by another connection.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Ids per `IN (...)` list; keeps well under SQLite's bound-parameter limit.
const MAX_IN_PARAMS: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    product_id  INTEGER PRIMARY KEY,
    name        TEXT    NOT NULL,
    value       INTEGER NOT NULL CHECK (value >= 0),
    weight      INTEGER NOT NULL CHECK (weight >= 0),
    image       TEXT    NOT NULL DEFAULT '',
    description TEXT    NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS orders (
    order_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id        INTEGER NOT NULL,
    product_id     INTEGER NOT NULL REFERENCES products (product_id),
    weight         INTEGER NOT NULL,
    value          INTEGER NOT NULL,
    shipped_status TEXT    NOT NULL,
    created_at     TEXT    NOT NULL,
    arrived_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (shipped_status, order_id);
CREATE INDEX IF NOT EXISTS idx_orders_user ON orders (user_id, order_id);
"#;

fn store_err(err: rusqlite::Error) -> DepotError {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => DepotError::store(msg),
        other => DepotError::store(other.to_string()),
    }
}

fn to_sql_int(field: &str, v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| DepotError::InvalidInput(format!("{} {} out of range", field, v)))
}

fn from_sql_int(v: i64) -> u64 {
    v.max(0) as u64
}

fn parse_status(raw: String) -> rusqlite::Result<OrderStatus> {
    raw.parse().map_err(|e: DepotError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// `LIKE` pattern for `term`, with wildcards in the term itself escaped.
fn like_pattern(term: &str, mode: MatchMode) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    match mode {
        MatchMode::Partial => format!("%{}%", escaped),
        MatchMode::Prefix => format!("{}%", escaped),
    }
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

const ORDER_COLUMNS: &str =
    "order_id, user_id, product_id, weight, value, shipped_status, created_at, arrived_at";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        order_id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        weight: from_sql_int(row.get(3)?),
        value: from_sql_int(row.get(4)?),
        shipped_status: parse_status(row.get(5)?)?,
        created_at: row.get(6)?,
        arrived_at: row.get(7)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        product_id: row.get(0)?,
        name: row.get(1)?,
        value: from_sql_int(row.get(2)?),
        weight: from_sql_int(row.get(3)?),
        image: row.get(4)?,
        description: row.get(5)?,
    })
}

// ==========================================
// Statements shared by the store and its transactions
// ==========================================

fn insert_order(conn: &Connection, user_id: UserId, product_id: ProductId) -> Result<OrderId> {
    let inserted = conn
        .execute(
            "INSERT INTO orders (user_id, product_id, weight, value, shipped_status, created_at)
             SELECT ?1, product_id, weight, value, ?2, ?3 FROM products WHERE product_id = ?4",
            params![user_id, OrderStatus::Shipping.as_str(), Utc::now(), product_id],
        )
        .map_err(store_err)?;
    if inserted == 0 {
        return Err(DepotError::not_found("Product", product_id));
    }
    Ok(conn.last_insert_rowid())
}

fn awaiting_orders(conn: &Connection) -> Result<Vec<Order>> {
    let sql = format!(
        "SELECT {} FROM orders WHERE shipped_status = ?1 ORDER BY order_id ASC",
        ORDER_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql).map_err(store_err)?;
    let rows = stmt
        .query_map(params![OrderStatus::Shipping.as_str()], order_from_row)
        .map_err(store_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
}

fn update_statuses(
    conn: &Connection,
    order_ids: &[OrderId],
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut ids = order_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let completed = status == OrderStatus::Completed;
    let mut updated = 0;
    for chunk in ids.chunks(MAX_IN_PARAMS) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "UPDATE orders
             SET shipped_status = ?,
                 arrived_at = CASE WHEN ? THEN ? ELSE arrived_at END
             WHERE order_id IN ({})",
            placeholders
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(status.as_str()), Box::new(completed), Box::new(now)];
        args.extend(chunk.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>));

        updated += conn
            .execute(&sql, params_from_iter(args.iter().map(|a| a.as_ref())))
            .map_err(store_err)?;
    }
    Ok(updated)
}

fn get_order(conn: &Connection, order_id: OrderId) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE order_id = ?1", ORDER_COLUMNS);
    conn.query_row(&sql, params![order_id], order_from_row)
        .optional()
        .map_err(store_err)
}

fn list_orders(conn: &Connection, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
    let mut where_clause = String::from(" WHERE o.user_id = ?1");
    let mut args = vec![Value::Integer(user_id)];
    if let Some(term) = query.search_term() {
        where_clause.push_str(" AND p.name LIKE ?2 ESCAPE '\\'");
        args.push(Value::Text(like_pattern(term, query.match_mode)));
    }
    let from = format!(
        " FROM orders o INNER JOIN products p ON o.product_id = p.product_id{}",
        where_clause
    );

    let total: i64 = conn
        .query_row(&format!("SELECT COUNT(*){}", from), params_from_iter(args.iter()), |row| {
            row.get(0)
        })
        .map_err(store_err)?;
    if total == 0 {
        return Ok(Page::empty());
    }

    let sql = format!(
        "SELECT o.order_id, o.product_id, p.name, o.shipped_status, o.created_at, o.arrived_at{}
         ORDER BY {} {}, o.order_id ASC LIMIT {} OFFSET {}",
        from,
        query.sort_field.column(),
        query.sort_order.as_sql(),
        query.limit(),
        query.offset()
    );
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok(OrderSummary {
                order_id: row.get(0)?,
                product_id: row.get(1)?,
                product_name: row.get(2)?,
                shipped_status: parse_status(row.get(3)?)?,
                created_at: row.get(4)?,
                arrived_at: row.get(5)?,
            })
        })
        .map_err(store_err)?;
    let data = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)?;

    Ok(Page {
        data,
        total: total as usize,
    })
}

fn insert_product(conn: &Connection, product: &Product) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO products (product_id, name, value, weight, image, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            product.product_id,
            product.name,
            to_sql_int("value", product.value)?,
            to_sql_int("weight", product.weight)?,
            product.image,
            product.description,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

fn get_product(conn: &Connection, product_id: ProductId) -> Result<Option<Product>> {
    conn.query_row(
        "SELECT product_id, name, value, weight, image, description FROM products WHERE product_id = ?1",
        params![product_id],
        product_from_row,
    )
    .optional()
    .map_err(store_err)
}

fn list_products(conn: &Connection, query: &ProductQuery) -> Result<Page<Product>> {
    let mut where_clause = String::new();
    let mut args = Vec::new();
    if let Some(term) = query.search_term() {
        where_clause.push_str(" WHERE name LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\'");
        args.push(Value::Text(like_pattern(term, MatchMode::Partial)));
    }

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM products{}", where_clause),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )
        .map_err(store_err)?;
    if total == 0 {
        return Ok(Page::empty());
    }

    let sql = format!(
        "SELECT product_id, name, value, weight, image, description FROM products{}
         ORDER BY {} {}, product_id ASC LIMIT {} OFFSET {}",
        where_clause,
        query.sort_field.column(),
        query.sort_order.as_sql(),
        query.limit(),
        query.offset()
    );
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), product_from_row)
        .map_err(store_err)?;
    let data = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)?;

    Ok(Page {
        data,
        total: total as usize,
    })
}

/// A lock held by another connection outlasted the wait.
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn busy_timeout_err(wait: Duration) -> DepotError {
    DepotError::Timeout {
        duration_ms: wait.as_millis() as u64,
        message: "database is locked by another connection".to_string(),
    }
}

/// Run `f` on the blocking pool; rusqlite never runs on a runtime worker.
async fn blocking<R, F>(f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DepotError::Internal(format!("database task failed: {}", e)))?
}

// ==========================================
// SqliteStore
// ==========================================

/// SQLite implementation of [`OrderStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(store_err)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, configuring it and applying the schema.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run raw SQL outside any transaction (migrations, fixtures).
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql).map_err(store_err))
            .await
    }

    /// Run `f` on the connection once no transaction holds it.
    ///
    /// The connection stays claimed until `f` returns, even when the caller
    /// stops waiting.
    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        let conn = self.conn.clone().lock_owned().await;
        blocking(move || f(&conn)).await
    }

    /// Issue `BEGIN IMMEDIATE` on a claimed connection, waiting at most
    /// `busy_wait` for other connections. `budget` is set when running out of
    /// that wait should surface as a timeout.
    async fn start(
        conn: OwnedMutexGuard<Connection>,
        busy_wait: Duration,
        budget: Option<Duration>,
    ) -> Result<SqliteTx> {
        // Built on the blocking thread, so that a caller who gave up still
        // gets the transaction rolled back when the result is dropped.
        let state = blocking(move || {
            conn.busy_timeout(busy_wait).map_err(store_err)?;
            let mut state = TxState {
                conn,
                open: false,
                budget,
            };
            state.conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| state.error(e))?;
            state.open = true;
            Ok(state)
        })
        .await?;
        debug!("Opened SQLite transaction");

        Ok(SqliteTx {
            state: Arc::new(StdMutex::new(state)),
        })
    }
}

#[async_trait]
impl OrderRepository for SqliteStore {
    async fn insert_order(&self, user_id: UserId, product_id: ProductId) -> Result<OrderId> {
        self.run(move |conn| insert_order(conn, user_id, product_id))
            .await
    }

    async fn awaiting_orders(&self) -> Result<Vec<Order>> {
        self.run(awaiting_orders).await
    }

    async fn update_statuses(&self, order_ids: &[OrderId], status: OrderStatus) -> Result<usize> {
        if order_ids.is_empty() {
            return Ok(0);
        }
        let order_ids = order_ids.to_vec();
        let now = Utc::now();
        self.run(move |conn| {
            if order_ids.len() <= MAX_IN_PARAMS {
                return update_statuses(conn, &order_ids, status, now);
            }
            // Several statements; keep them all-or-nothing.
            conn.execute_batch("BEGIN IMMEDIATE").map_err(store_err)?;
            match update_statuses(conn, &order_ids, status, now) {
                Ok(updated) => {
                    conn.execute_batch("COMMIT").map_err(store_err)?;
                    Ok(updated)
                }
                Err(e) => {
                    if let Err(rb) = conn.execute_batch("ROLLBACK") {
                        warn!("Rollback after failed status update also failed: {}", rb);
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.run(move |conn| get_order(conn, order_id)).await
    }

    async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
        let query = query.clone();
        self.run(move |conn| list_orders(conn, user_id, &query)).await
    }
}

#[async_trait]
impl ProductRepository for SqliteStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        let product = product.clone();
        self.run(move |conn| insert_product(conn, &product)).await
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.run(move |conn| get_product(conn, product_id)).await
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let query = query.clone();
        self.run(move |conn| list_products(conn, &query)).await
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx> {
        let conn = self.conn.clone().lock_owned().await;
        Self::start(conn, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS), None).await
    }

    /// Both waits come out of `wait`: first for this store's own connection,
    /// then for other connections on the same database file.
    async fn begin_within(&self, wait: Duration) -> Result<SqliteTx> {
        let started = Instant::now();
        let conn = tokio::time::timeout(wait, self.conn.clone().lock_owned())
            .await
            .map_err(|_| busy_timeout_err(wait))?;
        let busy_wait = wait.saturating_sub(started.elapsed());
        Self::start(conn, busy_wait, Some(wait)).await
    }
}

// ==========================================
// SqliteTx
// ==========================================

/// Transaction over a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteTx {
    state: Arc<StdMutex<TxState>>,
}

impl std::fmt::Debug for SqliteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTx").finish_non_exhaustive()
    }
}

struct TxState {
    conn: OwnedMutexGuard<Connection>,
    open: bool,
    /// Set when the transaction was opened against a deadline.
    budget: Option<Duration>,
}

impl TxState {
    fn error(&self, err: rusqlite::Error) -> DepotError {
        match self.budget {
            Some(wait) if is_busy(&err) => busy_timeout_err(wait),
            _ => store_err(err),
        }
    }
}

impl Drop for TxState {
    fn drop(&mut self) {
        if self.open {
            debug!("Rolling back abandoned SQLite transaction");
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rollback of abandoned transaction failed: {}", e);
            }
        }
        if let Err(e) = self.conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)) {
            warn!("Restoring busy timeout failed: {}", e);
        }
    }
}

impl SqliteTx {
    async fn with_conn<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        let state = self.state.clone();
        blocking(move || {
            let state = state
                .lock()
                .map_err(|e| DepotError::store(format!("transaction lock poisoned: {}", e)))?;
            if !state.open {
                return Err(DepotError::TransactionClosed);
            }
            f(&state.conn)
        })
        .await
    }

    async fn finish(&self, sql: &'static str) -> Result<()> {
        let state = self.state.clone();
        blocking(move || {
            let mut state = state
                .lock()
                .map_err(|e| DepotError::store(format!("transaction lock poisoned: {}", e)))?;
            if !state.open {
                return Err(DepotError::TransactionClosed);
            }
            if let Err(e) = state.conn.execute_batch(sql) {
                return Err(state.error(e));
            }
            state.open = false;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl OrderRepository for SqliteTx {
    async fn insert_order(&self, user_id: UserId, product_id: ProductId) -> Result<OrderId> {
        self.with_conn(move |conn| insert_order(conn, user_id, product_id))
            .await
    }

    async fn awaiting_orders(&self) -> Result<Vec<Order>> {
        self.with_conn(awaiting_orders).await
    }

    async fn update_statuses(&self, order_ids: &[OrderId], status: OrderStatus) -> Result<usize> {
        let order_ids = order_ids.to_vec();
        let now = Utc::now();
        self.with_conn(move |conn| update_statuses(conn, &order_ids, status, now))
            .await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.with_conn(move |conn| get_order(conn, order_id)).await
    }

    async fn list_orders(&self, user_id: UserId, query: &OrderQuery) -> Result<Page<OrderSummary>> {
        let query = query.clone();
        self.with_conn(move |conn| list_orders(conn, user_id, &query))
            .await
    }
}

#[async_trait]
impl ProductRepository for SqliteTx {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        let product = product.clone();
        self.with_conn(move |conn| insert_product(conn, &product))
            .await
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.with_conn(move |conn| get_product(conn, product_id))
            .await
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let query = query.clone();
        self.with_conn(move |conn| list_products(conn, &query))
            .await
    }
}

#[async_trait]
impl Transaction for SqliteTx {
    async fn commit(self) -> Result<()> {
        // On failure the state stays open and is rolled back when dropped.
        self.finish("COMMIT").await
    }

    async fn rollback(self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
