//! Money Transfer Engine
//!
//! Moves an amount between two accounts as one atomic storage transaction,
//! producing a transfer record and two offsetting entries.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ TransferService ──▶ exec_tx ──▶ Store (PostgreSQL | memory)
//!               (orchestrator)   (executor)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Ascending Lock Order**: account rows are locked lower id first,
//!    independent of transfer direction
//! 2. **Single Atomicity Boundary**: only `exec_tx` begins, commits or rolls
//!    back; a failed transfer leaves no entry, transfer or balance change
//! 3. **Two Entries Per Transfer**: `-amount` on the source, `+amount` on the
//!    destination
//! 4. **No Hidden Retry**: transient failures are returned to the caller

pub mod adapters;
pub mod error;
pub mod executor;
pub mod retry;
pub mod schema;
pub mod service;
pub mod state;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use error::{ErrorKind, LedgerError};
pub use executor::exec_tx;
pub use retry::{RetryPolicy, with_retry};
pub use service::{TransferService, TransferSettings, lock_order};
pub use state::TransferPhase;
pub use store::{Queries, Store, TxHandle};
pub use types::{
    Account, AccountId, CreateAccountParams, Entry, OverdraftPolicy, Transfer, TransferTxParams,
    TransferTxResult,
};
