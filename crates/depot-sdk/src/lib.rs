//! # Depot SDK
//!
//! Client SDK for interacting with Depot nodes, used by checkout front-ends
//! and delivery robots.

pub mod client;

pub use client::DepotClient;

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::DepotClient;
    pub use depot_core::prelude::*;
}
