//! # tally-ledger
//!
//! The transaction engine: the only code path that changes a user's points.
//!
//! Every change is one atomic unit of three steps: read the cached balance,
//! write the new balance, append the matching transaction row. The unit runs
//! inside a `BEGIN IMMEDIATE` SQLite transaction, so concurrent callers for
//! the same user are serialized by the store and the cached balance always
//! equals the sum of the user's log.
//!
//! ## Modules
//!
//! - [`engine`]: accounts, `apply_transaction`, refunds, history
//! - [`reconcile`]: checking cached balances against the log

pub mod engine;
pub mod reconcile;

pub use engine::{apply_in, apply_transaction, open_account, open_account_in, Applied, TransactionRequest};

use tally_db::DbError;

/// Error types for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The user has no balance row.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The debit would make the balance negative.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Points the debit needs.
        required: i64,
        /// Points the user has.
        available: i64,
    },

    /// Transactions must move at least one point.
    #[error("transaction amount is zero")]
    ZeroAmount,

    /// Arithmetic overflow.
    #[error("arithmetic overflow in balance calculation")]
    Overflow,

    /// The store is locked or unreachable. Safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(DbError),
}

impl LedgerError {
    /// True when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::StorageUnavailable(_))
    }
}

impl From<DbError> for LedgerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Busy(detail) => LedgerError::StorageUnavailable(detail),
            other => LedgerError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::from(DbError::from(e))
    }
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
