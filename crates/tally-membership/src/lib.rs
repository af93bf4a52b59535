//! # tally-membership
//!
//! Membership tiers, expiry and the daily allowance reset.
//!
//! Per user the state machine is `FREE -> PREMIUM/PRO -> FREE` (on expiry)
//! `-> PREMIUM/PRO` (on renewal). Expiry is lazy: it is noticed and
//! persisted by the first read after `membership_expires_at`.
//!
//! ## Modules
//!
//! - [`policy`]: per-tier allowance, price and plan length
//! - [`status`]: status reads, grants, purchases
//! - [`reset`]: per-user and batch daily resets

pub mod policy;
pub mod reset;
pub mod status;

pub use policy::MembershipPolicy;
pub use reset::{batch_reset_all, reset_daily_allowance, BatchOptions, BatchReport, ResetOutcome};
pub use status::{
    extend_membership_in, grant_membership, grant_membership_in, membership_status,
    purchase_membership, MembershipChange, MembershipStatus, Purchase,
};

use tally_db::DbError;
use tally_ledger::LedgerError;
use tally_types::MembershipTier;

/// Error types for membership operations.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The purchase price exceeds the balance. No tier change happened.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    /// The tier cannot be granted or bought (FREE, or no price configured).
    #[error("tier not available: {0}")]
    InvalidTier(MembershipTier),

    /// Grants must cover at least one day.
    #[error("membership duration must be at least one day")]
    InvalidDuration,

    /// Another scheduler holds the batch-reset lease.
    #[error("batch reset already running")]
    BatchInProgress,

    /// The store is locked or unreachable. Safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("storage error: {0}")]
    Storage(DbError),
}

impl MembershipError {
    /// True when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MembershipError::StorageUnavailable(_))
    }
}

impl From<LedgerError> for MembershipError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UserNotFound(u) => MembershipError::UserNotFound(u),
            LedgerError::InsufficientBalance {
                required,
                available,
            } => MembershipError::InsufficientBalance {
                required,
                available,
            },
            LedgerError::StorageUnavailable(detail) => MembershipError::StorageUnavailable(detail),
            other => MembershipError::Ledger(other),
        }
    }
}

impl From<DbError> for MembershipError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Busy(detail) => MembershipError::StorageUnavailable(detail),
            other => MembershipError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for MembershipError {
    fn from(e: rusqlite::Error) -> Self {
        MembershipError::from(DbError::from(e))
    }
}

/// Convenience result type for membership operations.
pub type Result<T> = std::result::Result<T, MembershipError>;
