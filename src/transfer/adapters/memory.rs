//! In-memory Storage Engine
//!
//! Row-locking engine that lives inside the process. Each account row owns
//! an async mutex; `get_account_for_update` and `add_account_balance`
//! acquire it and keep it until the transaction commits or is dropped, the
//! same way PostgreSQL holds row locks. Writes are buffered per transaction
//! and applied in one step on commit.
//!
//! Waiting longer than the lock timeout fails with a transient error, which
//! is how this engine surfaces a lock cycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

use crate::transfer::error::LedgerError;
use crate::transfer::store::{Queries, Store, TxHandle};
use crate::transfer::types::{Account, AccountId, CreateAccountParams, Entry, Transfer};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Operation at which an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetAccountForUpdate,
    AddAccountBalance,
    CreateEntry,
    CreateTransfer,
    Commit,
    Rollback,
}

struct AccountRow {
    account: Account,
    lock: Arc<RowLock<()>>,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, AccountRow>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    account_seq: i64,
    entry_seq: i64,
    transfer_seq: i64,
}

struct Inner {
    tables: Mutex<Tables>,
    /// One-shot failures, consumed when they fire
    faults: Mutex<HashMap<FailPoint, LedgerError>>,
    lock_timeout: Duration,
}

impl Inner {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, LedgerError> {
        self.tables
            .lock()
            .map_err(|_| LedgerError::FatalStorage("memory store tables poisoned".to_string()))
    }

    fn check_fault(&self, point: FailPoint) -> Result<(), LedgerError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| LedgerError::FatalStorage("memory store faults poisoned".to_string()))?;
        match faults.remove(&point) {
            Some(err) => {
                debug!(?point, error = %err, "Injected failure fired");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// In-memory store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                faults: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Make the next call at `point` fail with `err`.
    pub fn inject_failure(&self, point: FailPoint, err: LedgerError) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.insert(point, err);
        }
    }

    /// Total number of committed entries across all accounts
    pub fn entry_count(&self) -> Result<usize, LedgerError> {
        Ok(self.inner.tables()?.entries.len())
    }

    /// Total number of committed transfers
    pub fn transfer_count(&self) -> Result<usize, LedgerError> {
        Ok(self.inner.tables()?.transfers.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        Ok(MemoryTx {
            inner: Arc::clone(&self.inner),
            locks: HashMap::new(),
            deltas: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError> {
        let mut tables = self.inner.tables()?;
        tables.account_seq += 1;
        let account = Account {
            id: tables.account_seq,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        tables.accounts.insert(
            account.id,
            AccountRow {
                account: account.clone(),
                lock: Arc::new(RowLock::new(())),
            },
        );
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.inner
            .tables()?
            .accounts
            .get(&id)
            .map(|row| row.account.clone())
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError> {
        self.inner
            .tables()?
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound { table: "entries", id })
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError> {
        self.inner
            .tables()?
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                table: "transfers",
                id,
            })
    }

    async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError> {
        Ok(self
            .inner
            .tables()?
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
    ) -> Result<Vec<Transfer>, LedgerError> {
        Ok(self
            .inner
            .tables()?
            .transfers
            .values()
            .filter(|t| t.from_account_id == from_account_id && t.to_account_id == to_account_id)
            .cloned()
            .collect())
    }
}

/// Open transaction against a [`MemoryStore`]
pub struct MemoryTx {
    inner: Arc<Inner>,
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    /// Pending balance changes
    deltas: BTreeMap<AccountId, i64>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryTx {
    async fn lock_row(&mut self, id: AccountId) -> Result<(), LedgerError> {
        if self.locks.contains_key(&id) {
            return Ok(());
        }

        // Scheduling point: concurrent transactions interleave on every lock request
        tokio::task::yield_now().await;

        let lock = {
            let tables = self.inner.tables()?;
            match tables.accounts.get(&id) {
                Some(row) => Arc::clone(&row.lock),
                None => return Err(LedgerError::AccountNotFound(id)),
            }
        };

        let guard = tokio::time::timeout(self.inner.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::TransientStorage(format!(
                    "lock wait timeout on account {} after {:?}",
                    id, self.inner.lock_timeout
                ))
            })?;
        self.locks.insert(id, guard);
        Ok(())
    }

    /// Committed row plus this transaction's pending delta
    fn snapshot(&self, id: AccountId) -> Result<Account, LedgerError> {
        let tables = self.inner.tables()?;
        let mut account = tables
            .accounts
            .get(&id)
            .map(|row| row.account.clone())
            .ok_or(LedgerError::AccountNotFound(id))?;
        let pending = self.deltas.get(&id).copied().unwrap_or(0);
        account.balance = account
            .balance
            .checked_add(pending)
            .ok_or_else(|| balance_out_of_range(id))?;
        Ok(account)
    }

    fn account_exists(&self, id: AccountId) -> Result<bool, LedgerError> {
        Ok(self.inner.tables()?.accounts.contains_key(&id))
    }
}

fn balance_out_of_range(id: AccountId) -> LedgerError {
    LedgerError::FatalStorage(format!("balance of account {} out of range", id))
}

fn foreign_key_violation(table: &str, id: AccountId) -> LedgerError {
    LedgerError::FatalStorage(format!(
        "insert on table \"{}\" violates foreign key constraint: account {} does not exist",
        table, id
    ))
}

#[async_trait]
impl Queries for MemoryTx {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        self.inner.check_fault(FailPoint::GetAccountForUpdate)?;
        self.lock_row(id).await?;
        self.snapshot(id)
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        self.inner.check_fault(FailPoint::AddAccountBalance)?;
        self.lock_row(id).await?;

        let mut account = self.snapshot(id)?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| balance_out_of_range(id))?;

        let pending = self.deltas.entry(id).or_insert(0);
        *pending = pending
            .checked_add(delta)
            .ok_or_else(|| balance_out_of_range(id))?;
        Ok(account)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, LedgerError> {
        self.inner.check_fault(FailPoint::CreateEntry)?;
        if !self.account_exists(account_id)? {
            return Err(foreign_key_violation("entries", account_id));
        }

        let id = {
            let mut tables = self.inner.tables()?;
            tables.entry_seq += 1;
            tables.entry_seq
        };
        let entry = Entry {
            id,
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, LedgerError> {
        self.inner.check_fault(FailPoint::CreateTransfer)?;
        if amount <= 0 {
            return Err(LedgerError::FatalStorage(
                "new row for relation \"transfers\" violates check constraint \"transfers_amount_check\""
                    .to_string(),
            ));
        }
        for id in [from_account_id, to_account_id] {
            if !self.account_exists(id)? {
                return Err(foreign_key_violation("transfers", id));
            }
        }

        let id = {
            let mut tables = self.inner.tables()?;
            tables.transfer_seq += 1;
            tables.transfer_seq
        };
        let transfer = Transfer {
            id,
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn commit(self) -> Result<(), LedgerError> {
        let MemoryTx {
            inner,
            locks,
            deltas,
            entries,
            transfers,
        } = self;
        inner.check_fault(FailPoint::Commit)?;

        {
            let mut tables = inner.tables()?;
            // Validate every delta before touching any row
            let mut updated = Vec::with_capacity(deltas.len());
            for (&id, &delta) in &deltas {
                let row = tables
                    .accounts
                    .get(&id)
                    .ok_or(LedgerError::AccountNotFound(id))?;
                let balance = row
                    .account
                    .balance
                    .checked_add(delta)
                    .ok_or_else(|| balance_out_of_range(id))?;
                updated.push((id, balance));
            }
            for (id, balance) in updated {
                if let Some(row) = tables.accounts.get_mut(&id) {
                    row.account.balance = balance;
                }
            }
            for entry in entries {
                tables.entries.insert(entry.id, entry);
            }
            for transfer in transfers {
                tables.transfers.insert(transfer.id, transfer);
            }
        }

        // Row locks are released only after the writes are visible
        drop(locks);
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.inner.check_fault(FailPoint::Rollback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &MemoryStore, owner: &str, balance: i64) -> Account {
        store
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                balance,
                currency: "EUR".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let store = MemoryStore::new();
        let a = seed(&store, "alice", 0).await;
        let b = seed(&store, "bob", 0).await;
        assert_eq!(a.id + 1, b.id);
        assert_eq!(store.get_account(b.id).await.unwrap().owner, "bob");
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_account(42).await,
            Err(LedgerError::AccountNotFound(42))
        ));
        assert!(matches!(
            store.get_entry(1).await,
            Err(LedgerError::NotFound { table: "entries", id: 1 })
        ));

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.get_account_for_update(42).await,
            Err(LedgerError::AccountNotFound(42))
        ));
        assert!(tx.create_entry(42, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let a = seed(&store, "alice", 100).await;

        let mut tx = store.begin().await.unwrap();
        let updated = tx.add_account_balance(a.id, -30).await.unwrap();
        tx.create_entry(a.id, -30).await.unwrap();
        assert_eq!(updated.balance, 70);

        assert_eq!(store.get_account(a.id).await.unwrap().balance, 100);
        assert_eq!(store.entry_count().unwrap(), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 70);
        assert_eq!(store.list_entries(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_tx_releases_locks_and_discards_writes() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(200));
        let a = seed(&store, "alice", 100).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.add_account_balance(a.id, 500).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let locked = tx.get_account_for_update(a.id).await.unwrap();
        assert_eq!(locked.balance, 100);
    }

    #[tokio::test]
    async fn test_lock_wait_times_out_as_transient() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let a = seed(&store, "alice", 100).await;

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(a.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_account_for_update(a.id).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("lock wait timeout"));

        holder.rollback().await.unwrap();
        waiter.get_account_for_update(a.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_opposite_lock_order_cannot_both_succeed() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(100));
        let a = seed(&store, "alice", 100).await;
        let b = seed(&store, "bob", 100).await;

        let (a_id, b_id) = (a.id, b.id);

        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        tx1.get_account_for_update(a_id).await.unwrap();
        tx2.get_account_for_update(b_id).await.unwrap();

        let (r1, r2) = tokio::join!(
            async move { tx1.get_account_for_update(b_id).await.map(|_| ()) },
            async move { tx2.get_account_for_update(a_id).await.map(|_| ()) },
        );

        let results = [r1, r2];
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(e) if e.is_retryable()))
        );
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        let a = seed(&store, "alice", 100).await;
        store.inject_failure(
            FailPoint::CreateEntry,
            LedgerError::FatalStorage("disk full".into()),
        );

        let mut tx = store.begin().await.unwrap();
        assert!(tx.create_entry(a.id, 1).await.is_err());
        assert!(tx.create_entry(a.id, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_transfer_amount_check_constraint() {
        let store = MemoryStore::new();
        let a = seed(&store, "alice", 100).await;
        let b = seed(&store, "bob", 100).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.create_transfer(a.id, b.id, 0).await.unwrap_err();
        assert!(err.to_string().contains("transfers_amount_check"));
    }
}
