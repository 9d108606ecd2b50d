//! Storage Seam
//!
//! The transfer engine only talks to storage through these traits.
//! Adapters live in [`super::adapters`].

use async_trait::async_trait;

use super::error::LedgerError;
use super::types::{Account, AccountId, CreateAccountParams, Entry, Transfer};

/// Row operations bound to one open transaction
#[async_trait]
pub trait Queries: Send {
    /// Read an account and hold its exclusive row lock until the
    /// transaction ends.
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account, LedgerError>;

    /// Atomic read-modify-write of the balance. Returns the updated row.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, LedgerError>;

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: i64,
    ) -> Result<Entry, LedgerError>;

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<Transfer, LedgerError>;
}

/// Transaction scope. Dropping an unfinished handle rolls it back.
#[async_trait]
pub trait TxHandle: Queries + Sized {
    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Storage engine
///
/// Besides opening transactions it exposes the collaborator reads used
/// around transfers (account setup, verification).
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: TxHandle + 'static;

    /// Open a new transaction scope
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError>;

    async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError>;

    async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError>;

    /// Entries for one account, oldest first
    async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>, LedgerError>;

    /// Transfers from `from_account_id` to `to_account_id`, oldest first
    async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
    ) -> Result<Vec<Transfer>, LedgerError>;
}
