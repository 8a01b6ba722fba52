//! Error types for the Depot fulfilment service.

use thiserror::Error;

use crate::types::ProductId;

/// Main error type for Depot operations.
#[derive(Error, Debug, Clone)]
pub enum DepotError {
    /// The order store failed (connectivity, constraint violation, rollback failure).
    #[error("Store error: {message}")]
    Store { message: String },

    /// Resource not found.
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    /// Caller supplied something the service cannot act on.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation did not finish within its deadline.
    #[error("Operation timed out after {duration_ms}ms: {message}")]
    Timeout { duration_ms: u64, message: String },

    /// A cancellation checkpoint fired during a long-running computation.
    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    /// The planning table would exceed the configured cell budget.
    #[error("Delivery plan too large: {candidates} candidates at capacity {capacity}")]
    PlanTooLarge { candidates: usize, capacity: u64 },

    /// One unit of a concurrent order batch failed; the whole batch was discarded.
    #[error("Failed to create order for product {product_id}: {source}")]
    OrderCreationFailed {
        product_id: ProductId,
        #[source]
        source: Box<DepotError>,
    },

    /// A transaction handle was used after commit or rollback.
    #[error("Transaction already closed")]
    TransactionClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DepotError {
    /// Shorthand for a store failure.
    pub fn store(message: impl Into<String>) -> Self {
        DepotError::Store {
            message: message.into(),
        }
    }

    /// Shorthand for a missing resource.
    pub fn not_found(resource_type: &str, id: impl ToString) -> Self {
        DepotError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Returns true if a caller may retry the operation as-is.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DepotError::Timeout { .. } => true,
            DepotError::Cancelled { .. } => true,
            DepotError::ConnectionError(_) => true,
            DepotError::Store { .. } => self.is_busy(),
            DepotError::OrderCreationFailed { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Returns true if the store gave up waiting for another connection's lock.
    pub fn is_busy(&self) -> bool {
        match self {
            DepotError::Store { message } => {
                message.contains("database is locked") || message.contains("database is busy")
            }
            _ => false,
        }
    }

    /// Returns true if the operation ran out of time, as opposed to failing in the store.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, DepotError::Timeout { .. } | DepotError::Cancelled { .. })
    }
}

/// Convenience Result type for Depot operations.
pub type Result<T> = std::result::Result<T, DepotError>;

impl From<serde_json::Error> for DepotError {
    fn from(err: serde_json::Error) -> Self {
        DepotError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_is_distinct_from_store_failure() {
        let timeout = DepotError::Timeout {
            duration_ms: 50,
            message: "planning".to_string(),
        };
        assert!(timeout.is_deadline_exceeded());
        assert!(!DepotError::store("disk I/O error").is_deadline_exceeded());
    }

    #[test]
    fn test_creation_failure_wraps_source() {
        let err = DepotError::OrderCreationFailed {
            product_id: 7,
            source: Box::new(DepotError::store("database is locked")),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_busy());
        assert!(DepotError::store("database is locked").is_busy());
        assert_eq!(
            err.to_string(),
            "Failed to create order for product 7: Store error: database is locked"
        );
    }
}
