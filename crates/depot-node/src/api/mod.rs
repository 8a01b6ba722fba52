//! HTTP API handlers.

pub mod error;
pub mod health;
pub mod orders;
pub mod products;
pub mod robot;
