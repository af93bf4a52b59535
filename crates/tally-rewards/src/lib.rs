//! # tally-rewards
//!
//! The idempotency gate between external triggers and the ledger.
//!
//! Each trigger (a signup, a completed invitation, a milestone crossed by an
//! inviter, a redemption code) has a key. Issuing a reward inserts a claim
//! row under that key and credits the ledger in the same transaction; a
//! second insert for the same key conflicts on the store's unique index and
//! resolves to [`Issuance::AlreadyIssued`]. There is no read-then-write
//! window.
//!
//! ## Modules
//!
//! - [`trigger`]: trigger keys
//! - [`issuer`]: issuing and reserving claims

pub mod issuer;
pub mod trigger;

pub use issuer::{find_claim, issue_in, issue_reward, list_claims, reserve_in, Issuance, RewardRequest};
pub use trigger::Trigger;

use tally_db::DbError;
use tally_ledger::LedgerError;

/// Error types for reward issuance.
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Rewards credit points; the amount must be positive.
    #[error("reward amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// The store is locked or unreachable. Safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("storage error: {0}")]
    Storage(DbError),
}

impl RewardError {
    /// True when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RewardError::StorageUnavailable(_))
    }
}

impl From<LedgerError> for RewardError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UserNotFound(u) => RewardError::UserNotFound(u),
            LedgerError::StorageUnavailable(detail) => RewardError::StorageUnavailable(detail),
            other => RewardError::Ledger(other),
        }
    }
}

impl From<DbError> for RewardError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Busy(detail) => RewardError::StorageUnavailable(detail),
            other => RewardError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for RewardError {
    fn from(e: rusqlite::Error) -> Self {
        RewardError::from(DbError::from(e))
    }
}

/// Convenience result type for reward operations.
pub type Result<T> = std::result::Result<T, RewardError>;
