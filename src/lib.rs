//! Bank Ledger - Money Transfer Engine
//!
//! Moves money between accounts with double-entry bookkeeping. Every
//! transfer is one storage transaction that locks both account rows in
//! ascending id order, so concurrent transfers in opposite directions
//! never deadlock.
//!
//! # Modules
//!
//! - [`transfer`] - Executor, orchestrator, storage seam and engines
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL connection pool

pub mod config;
pub mod db;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use transfer::{
    Account, AccountId, CreateAccountParams, Entry, ErrorKind, LedgerError, OverdraftPolicy,
    RetryPolicy, Transfer, TransferService, TransferSettings, TransferTxParams, TransferTxResult,
};
