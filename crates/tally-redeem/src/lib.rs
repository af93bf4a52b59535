//! # tally-redeem
//!
//! Single-use redemption codes for points or membership time.
//!
//! A redemption is one immediate transaction: the guarded `is_used` flip,
//! the reward claim keyed by the code, and the grant itself. If any step
//! fails the whole unit rolls back and the code stays unused, so a code is
//! never consumed without its grant.
//!
//! ## Modules
//!
//! - [`registry`]: creating and looking up codes
//! - [`redeem`]: consuming a code

pub mod redeem;
pub mod registry;

pub use redeem::{redeem, Grant, Redemption};
pub use registry::{create_codes, get_code, redeemed_by, CodeDefinition};

use tally_db::DbError;
use tally_membership::MembershipError;
use tally_rewards::RewardError;

/// Error types for redemption operations.
#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    #[error("redemption code not found: {0}")]
    CodeNotFound(String),

    #[error("redemption code expired: {0}")]
    CodeExpired(String),

    #[error("redemption code already used: {0}")]
    CodeAlreadyUsed(String),

    /// The code definition cannot be granted (no value, no tier, ...).
    #[error("invalid redemption code: {0}")]
    InvalidCode(String),

    #[error("could not allocate unique redemption codes")]
    CodeSpaceExhausted,

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The store is locked or unreachable. Safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("reward error: {0}")]
    Reward(RewardError),

    #[error("membership error: {0}")]
    Membership(MembershipError),

    #[error("storage error: {0}")]
    Storage(DbError),
}

impl RedeemError {
    /// True when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RedeemError::StorageUnavailable(_))
    }
}

impl From<RewardError> for RedeemError {
    fn from(e: RewardError) -> Self {
        match e {
            RewardError::UserNotFound(u) => RedeemError::UserNotFound(u),
            RewardError::StorageUnavailable(detail) => RedeemError::StorageUnavailable(detail),
            other => RedeemError::Reward(other),
        }
    }
}

impl From<MembershipError> for RedeemError {
    fn from(e: MembershipError) -> Self {
        match e {
            MembershipError::UserNotFound(u) => RedeemError::UserNotFound(u),
            MembershipError::StorageUnavailable(detail) => RedeemError::StorageUnavailable(detail),
            other => RedeemError::Membership(other),
        }
    }
}

impl From<DbError> for RedeemError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Busy(detail) => RedeemError::StorageUnavailable(detail),
            other => RedeemError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for RedeemError {
    fn from(e: rusqlite::Error) -> Self {
        RedeemError::from(DbError::from(e))
    }
}

/// Convenience result type for redemption operations.
pub type Result<T> = std::result::Result<T, RedeemError>;
