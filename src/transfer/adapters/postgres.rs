//! PostgreSQL Storage Adapter
//!
//! Row locks come from `SELECT ... FOR UPDATE`; PostgreSQL holds them until
//! the transaction ends. A per-transaction `lock_timeout` turns a long lock
//! wait into SQLSTATE 55P03, which classifies as transient.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::transfer::error::LedgerError;
use crate::transfer::store::{Queries, Store, TxHandle};
use crate::transfer::types::{Account, AccountId, CreateAccountParams, Entry, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// PostgreSQL-backed store
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PostgresStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound every row-lock wait inside transactions opened by this store.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // is_local = true scopes the setting to this transaction
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        Ok(PostgresTx { tx })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&self.pool)
        .await?;

        debug!(account_id = account.id, owner = %account.owner, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 LIMIT 1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(&format!(
            "SELECT {} FROM entries WHERE id = $1 LIMIT 1",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound { table: "entries", id })
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {} FROM transfers WHERE id = $1 LIMIT 1",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound {
            table: "transfers",
            id,
        })
    }

    async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError> {
        let entries = sqlx::query_as::<_, Entry>(&format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let transfers = sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {} FROM transfers WHERE from_account_id = $1 AND to_account_id = $2 ORDER BY id",
            TRANSFER_COLUMNS
        ))
        .bind(from_account_id)
        .bind(to_account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transfers)
    }
}

/// Open PostgreSQL transaction. Dropped without commit, sqlx rolls it back.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Queries for PostgresTx {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 LIMIT 1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, LedgerError> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(entry)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, LedgerError> {
        let transfer = sqlx::query_as::<_, Transfer>(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {}",
            TRANSFER_COLUMNS
        ))
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(transfer)
    }
}

#[async_trait]
impl TxHandle for PostgresTx {
    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
