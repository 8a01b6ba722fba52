//! Transaction and deadline helpers.

use std::future::Future;
use std::time::{Duration, Instant};

use depot_core::{DepotError, Result};
use depot_store::{OrderStore, Transaction};
use tracing::{debug, warn};

/// Run `work` inside a fresh transaction.
///
/// Commits when `work` succeeds and rolls back when it fails. If the returned
/// future is dropped part-way (for example by [`with_timeout`]), the
/// transaction handle is dropped with it and the store rolls it back.
pub async fn exec_tx<S, F, Fut, T>(store: &S, work: F) -> Result<T>
where
    S: OrderStore,
    F: FnOnce(S::Tx) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tx = store.begin().await?;
    let outcome = work(tx.clone()).await;
    settle(tx, outcome).await
}

/// Like [`exec_tx`], but waiting for the store and running `work` both come
/// out of `budget`.
///
/// Expiry is reported as [`DepotError::Timeout`] and rolls back. The commit
/// itself is not cut short: once `work` is done its outcome is either kept
/// entirely or reported as a failure, never half-applied behind a timeout.
pub async fn exec_tx_within<S, F, Fut, T>(store: &S, budget: Duration, operation: &str, work: F) -> Result<T>
where
    S: OrderStore,
    F: FnOnce(S::Tx) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let tx = store.begin_within(budget).await?;
    let remaining = budget.saturating_sub(started.elapsed());
    let outcome = match tokio::time::timeout(remaining, work(tx.clone())).await {
        Ok(outcome) => outcome,
        Err(_) => Err(timeout_error(budget, operation)),
    };
    settle(tx, outcome).await
}

async fn settle<X: Transaction, T>(tx: X, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback after '{}' failed: {}", e, rollback_err);
            } else {
                debug!("Transaction rolled back: {}", e);
            }
            Err(e)
        }
    }
}

fn timeout_error(budget: Duration, operation: &str) -> DepotError {
    warn!("{} exceeded its {}ms budget", operation, budget.as_millis());
    DepotError::Timeout {
        duration_ms: budget.as_millis() as u64,
        message: format!("{} did not finish in time", operation),
    }
}

/// Bound `operation` by `budget`, reporting expiry as [`DepotError::Timeout`].
pub async fn with_timeout<T, Fut>(budget: Duration, operation: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(budget, operation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::Product;
    use depot_store::{InMemoryStore, OrderRepository};

    fn store() -> InMemoryStore {
        InMemoryStore::with_products([Product {
            product_id: 1,
            name: "Crate".to_string(),
            value: 10,
            weight: 3,
            image: String::new(),
            description: String::new(),
        }])
    }

    #[tokio::test]
    async fn test_exec_tx_commits_on_success() {
        let store = store();
        let id = exec_tx(&store, |tx| async move { tx.insert_order(1, 1).await })
            .await
            .unwrap();
        assert!(store.get_order(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exec_tx_rolls_back_on_error() {
        let store = store();
        let err = exec_tx(&store, |tx| async move {
            tx.insert_order(1, 1).await?;
            tx.insert_order(1, 404).await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DepotError::NotFound { .. }));
        assert!(store.awaiting_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_drops_transaction() {
        let store = store();
        let err = with_timeout(
            Duration::from_millis(20),
            "slow write",
            exec_tx(&store, |tx| async move {
                tx.insert_order(1, 1).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .await
        .unwrap_err();

        assert!(err.is_deadline_exceeded());
        assert!(store.awaiting_orders().await.unwrap().is_empty());
        // The writer gate was released with the dropped transaction.
        exec_tx(&store, |tx| async move { tx.insert_order(1, 1).await })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exec_tx_within_waits_no_longer_than_budget() {
        let store = store();
        let held = store.begin().await.unwrap();

        let started = Instant::now();
        let err = exec_tx_within(&store, Duration::from_millis(50), "blocked write", |tx| async move {
            tx.insert_order(1, 1).await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DepotError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(held);

        let err = exec_tx_within(&store, Duration::from_millis(20), "slow write", |tx| async move {
            tx.insert_order(1, 1).await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DepotError::Timeout { duration_ms: 20, .. }));
        assert!(store.awaiting_orders().await.unwrap().is_empty());

        let id = exec_tx_within(&store, Duration::from_secs(1), "write", |tx| async move {
            tx.insert_order(1, 1).await
        })
        .await
        .unwrap();
        assert!(store.get_order(id).await.unwrap().is_some());
    }
}
