//! # Depot Store
//!
//! Transactional order and product storage.
//!
//! Two backends implement the same [`OrderStore`] trait: an in-memory store
//! for tests and ephemeral nodes, and a SQLite store for everything else.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::{InMemoryStore, MemoryTx};
pub use sqlite::{SqliteStore, SqliteTx};
pub use store::{OrderRepository, OrderStore, ProductRepository, Transaction};
