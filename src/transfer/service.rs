//! Transfer Orchestrator
//!
//! Moves money between two accounts inside one storage transaction:
//! lock both rows, record the transfer and its two entries, adjust both
//! balances.
//!
//! # Lock Order
//!
//! Rows are always locked lower id first, whatever the direction. Two
//! concurrent transfers A→B and B→A therefore queue on the same row
//! instead of each holding one lock and waiting for the other.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::LedgerError;
use super::executor::exec_tx;
use super::state::TransferPhase;
use super::store::{Queries, Store};
use super::types::{AccountId, OverdraftPolicy, TransferTxParams, TransferTxResult};

/// Tracing target for per-phase events
pub const TARGET_TX: &str = "LEDGER_TX";

/// Orchestrator settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSettings {
    pub overdraft: OverdraftPolicy,
    /// Applied by [`TransferService::transfer_tx`]; `None` waits indefinitely
    pub deadline: Option<Duration>,
}

/// Returns `(first, second)` in the order the rows must be locked.
#[inline]
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Transfer orchestrator
///
/// Stateless apart from its settings; clone the `Arc` and share it
/// between tasks.
pub struct TransferService<S: Store> {
    store: Arc<S>,
    settings: TransferSettings,
}

impl<S: Store> TransferService<S> {
    pub fn new(store: Arc<S>, settings: TransferSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Execute one transfer under the configured deadline.
    ///
    /// Never retries. A `TransientStorage` error means nothing was written
    /// and the caller may submit the transfer again as a new operation.
    pub async fn transfer_tx(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, LedgerError> {
        match self.settings.deadline {
            Some(deadline) => self.transfer_tx_with_deadline(params, deadline).await,
            None => self.execute(params).await,
        }
    }

    /// Execute one transfer, abandoning it once `deadline` elapses.
    ///
    /// An abandoned transfer's transaction is dropped, which rolls it back
    /// and releases any row lock it holds.
    pub async fn transfer_tx_with_deadline(
        &self,
        params: TransferTxParams,
        deadline: Duration,
    ) -> Result<TransferTxResult, LedgerError> {
        tokio::time::timeout(deadline, self.execute(params))
            .await
            .map_err(|_| {
                warn!(
                    from = params.from_account_id,
                    to = params.to_account_id,
                    amount = params.amount,
                    deadline_ms = deadline.as_millis() as u64,
                    "Transfer deadline exceeded"
                );
                LedgerError::DeadlineExceeded(deadline)
            })?
    }

    async fn execute(&self, params: TransferTxParams) -> Result<TransferTxResult, LedgerError> {
        validate(&params)?;

        let overdraft = self.settings.overdraft;
        let result = exec_tx(self.store.as_ref(), move |q| {
            Box::pin(run_transfer(q, params, overdraft))
        })
        .await;

        match &result {
            Ok(res) => info!(
                transfer_id = res.transfer.id,
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                phase = %TransferPhase::Committed,
                "Transfer committed"
            ),
            Err(e) => warn!(
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                phase = %TransferPhase::RolledBack,
                code = e.code(),
                retryable = e.is_retryable(),
                error = %e,
                "Transfer rolled back"
            ),
        }
        result
    }
}

fn validate(params: &TransferTxParams) -> Result<(), LedgerError> {
    if params.amount <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "amount must be positive, got {}",
            params.amount
        )));
    }
    if params.from_account_id == params.to_account_id {
        return Err(LedgerError::InvalidArgument(format!(
            "source and destination account are the same ({})",
            params.from_account_id
        )));
    }
    Ok(())
}

async fn run_transfer<Q: Queries>(
    q: &mut Q,
    params: TransferTxParams,
    overdraft: OverdraftPolicy,
) -> Result<TransferTxResult, LedgerError> {
    let mut phase = TransferPhase::Started;
    let result = apply_transfer(q, params, overdraft, &mut phase).await;
    if let Err(e) = &result {
        debug!(target: TARGET_TX, phase = %phase, error = %e, "Transfer step failed");
    }
    result
}

async fn apply_transfer<Q: Queries>(
    q: &mut Q,
    params: TransferTxParams,
    overdraft: OverdraftPolicy,
    phase: &mut TransferPhase,
) -> Result<TransferTxResult, LedgerError> {
    let TransferTxParams {
        from_account_id,
        to_account_id,
        amount,
    } = params;
    let (lower_id, higher_id) = lock_order(from_account_id, to_account_id);

    let lower = q.get_account_for_update(lower_id).await?;
    phase.advance(TransferPhase::LockedLowerAccount)?;
    debug!(target: TARGET_TX, account_id = lower_id, phase = %phase, "Row locked");

    let higher = q.get_account_for_update(higher_id).await?;
    phase.advance(TransferPhase::LockedHigherAccount)?;
    debug!(target: TARGET_TX, account_id = higher_id, phase = %phase, "Row locked");

    let (source, destination) = if lower.id == from_account_id {
        (&lower, &higher)
    } else {
        (&higher, &lower)
    };

    if source.currency != destination.currency {
        return Err(LedgerError::InvalidArgument(format!(
            "currency mismatch: account {} is {}, account {} is {}",
            source.id, source.currency, destination.id, destination.currency
        )));
    }

    if overdraft == OverdraftPolicy::Reject && source.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            account_id: source.id,
            balance: source.balance,
            amount,
        });
    }

    let transfer = q
        .create_transfer(from_account_id, to_account_id, amount)
        .await?;
    let from_entry = q.create_entry(from_account_id, -amount).await?;
    let to_entry = q.create_entry(to_account_id, amount).await?;
    phase.advance(TransferPhase::EntriesWritten)?;
    debug!(target: TARGET_TX, transfer_id = transfer.id, phase = %phase, "Entries written");

    // Balance updates follow the lock order; each side gets its own sign.
    let (from_account, to_account) = if from_account_id == lower_id {
        let from_account = q.add_account_balance(from_account_id, -amount).await?;
        let to_account = q.add_account_balance(to_account_id, amount).await?;
        (from_account, to_account)
    } else {
        let to_account = q.add_account_balance(to_account_id, amount).await?;
        let from_account = q.add_account_balance(from_account_id, -amount).await?;
        (from_account, to_account)
    };
    phase.advance(TransferPhase::BalancesAdjusted)?;
    debug!(target: TARGET_TX, transfer_id = transfer.id, phase = %phase, "Balances adjusted");

    Ok(TransferTxResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}
