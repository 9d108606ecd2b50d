//! Ledger Error Types
//!
//! One error enum for the storage seam, the executor and the orchestrator.
//! Callers branch on [`ErrorKind`] rather than on variants.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::types::AccountId;

/// SQLSTATE codes that signal contention or a recoverable connection fault.
///
/// 40001 serialization_failure, 40P01 deadlock_detected,
/// 55P03 lock_not_available, 57014 query_canceled, 57P01 admin_shutdown.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "57014", "57P01"];

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    AccountNotFound,
    NotFound,
    InsufficientFunds,
    TransientStorage,
    FatalStorage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::TransientStorage => "TRANSIENT_STORAGE_ERROR",
            ErrorKind::FatalStorage => "FATAL_STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger error
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: i64 },

    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {amount}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: i64,
        amount: i64,
    },

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Storage error: {0}")]
    FatalStorage(String),

    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        cause: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::TransientStorage(_) | LedgerError::DeadlineExceeded(_) => {
                ErrorKind::TransientStorage
            }
            LedgerError::FatalStorage(_) => ErrorKind::FatalStorage,
            LedgerError::RollbackFailed { cause, .. } => cause.kind(),
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// A retry of the whole transfer may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStorage
    }

    /// Attach a rollback failure without masking the original cause.
    pub fn with_rollback_failure(self, rollback: LedgerError) -> Self {
        LedgerError::RollbackFailed {
            cause: Box::new(self),
            rollback: Box::new(rollback),
        }
    }

    /// The error that aborted the work, unwrapping any rollback failure.
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        let transient = match &e {
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| is_transient_sqlstate(&code)),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
            _ => false,
        };

        if transient {
            LedgerError::TransientStorage(e.to_string())
        } else {
            LedgerError::FatalStorage(e.to_string())
        }
    }
}

/// Class 08 covers every connection exception.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code)
}
