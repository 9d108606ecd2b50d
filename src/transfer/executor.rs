//! Transaction Executor
//!
//! The only place that begins, commits or rolls back a storage transaction.

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::error::LedgerError;
use super::store::{Store, TxHandle};

/// Run `unit_of_work` inside one transaction.
///
/// Commits on `Ok` and returns the value. On `Err` the transaction is
/// rolled back and the original error is returned; a failed rollback is
/// attached to it rather than replacing it.
pub async fn exec_tx<S, T, F>(store: &S, unit_of_work: F) -> Result<T, LedgerError>
where
    S: Store,
    T: Send,
    F: for<'q> FnOnce(&'q mut S::Tx) -> BoxFuture<'q, Result<T, LedgerError>> + Send,
{
    let mut tx = store.begin().await?;

    let outcome = unit_of_work(&mut tx).await;

    match outcome {
        Ok(value) => {
            tx.commit().await.inspect_err(|e| {
                warn!(error = %e, "Commit failed");
            })?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(cause) => match tx.rollback().await {
            Ok(()) => {
                debug!(error = %cause, "Transaction rolled back");
                Err(cause)
            }
            Err(rollback) => {
                error!(error = %cause, rollback_error = %rollback, "Rollback failed");
                Err(cause.with_rollback_failure(rollback))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::adapters::memory::{FailPoint, MemoryStore};
    use crate::transfer::error::ErrorKind;
    use crate::transfer::store::Queries;
    use crate::transfer::types::CreateAccountParams;

    async fn seed(store: &MemoryStore, balance: i64) -> i64 {
        store
            .create_account(CreateAccountParams {
                owner: "exec".to_string(),
                balance,
                currency: "USD".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let id = seed(&store, 100).await;

        let updated = exec_tx(&store, move |q| {
            Box::pin(async move { q.add_account_balance(id, 25).await })
        })
        .await
        .unwrap();

        assert_eq!(updated.balance, 125);
        assert_eq!(store.get_account(id).await.unwrap().balance, 125);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_earlier_writes() {
        let store = MemoryStore::new();
        let id = seed(&store, 100).await;

        let result: Result<(), LedgerError> = exec_tx(&store, move |q| {
            Box::pin(async move {
                q.add_account_balance(id, -40).await?;
                q.create_entry(id, -40).await?;
                Err(LedgerError::FatalStorage("boom".into()))
            })
        })
        .await;

        assert!(matches!(result, Err(LedgerError::FatalStorage(_))));
        assert_eq!(store.get_account(id).await.unwrap().balance, 100);
        assert!(store.list_entries(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_failure_does_not_mask_cause() {
        let store = MemoryStore::new();
        let id = seed(&store, 100).await;
        store.inject_failure(
            FailPoint::Rollback,
            LedgerError::FatalStorage("connection lost during rollback".into()),
        );

        let result: Result<(), LedgerError> = exec_tx(&store, move |q| {
            Box::pin(async move {
                q.add_account_balance(id, 10).await?;
                Err(LedgerError::TransientStorage("serialization failure".into()))
            })
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientStorage);
        assert!(matches!(err, LedgerError::RollbackFailed { .. }));
        assert!(err.to_string().contains("connection lost during rollback"));
        assert_eq!(store.get_account(id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_commit_failure_is_returned() {
        let store = MemoryStore::new();
        let id = seed(&store, 100).await;
        store.inject_failure(
            FailPoint::Commit,
            LedgerError::TransientStorage("could not serialize access".into()),
        );

        let result = exec_tx(&store, move |q| {
            Box::pin(async move { q.add_account_balance(id, 10).await })
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(store.get_account(id).await.unwrap().balance, 100);
    }
}
