//! # tally-invite
//!
//! Invitation codes, the inviter → invitee relation and the rewards they
//! unlock.
//!
//! Signup is the completion event: recording an invitee links them to the
//! code and counts the success in one transaction. Rewards follow in their
//! own transactions through `tally-rewards`, so a failed payout never
//! undoes the relationship; [`payouts::reconcile_rewards`] repays anything
//! missed using the same idempotency keys.
//!
//! ## Modules
//!
//! - [`policy`]: bonus sizes, code shape, milestone table
//! - [`codes`]: creating and deactivating codes
//! - [`tracker`]: recording invitees and recounting
//! - [`payouts`]: base bonuses, milestones, reconciliation
//! - [`stats`]: per-inviter summary

pub mod codes;
pub mod payouts;
pub mod policy;
pub mod stats;
pub mod tracker;

pub use codes::{create_code, deactivate_code};
pub use payouts::{check_milestones, reconcile_rewards, Payout, RewardReconciliation};
pub use policy::{InvitePolicy, MilestoneConfig};
pub use stats::{invite_stats, InviteStats};
pub use tracker::{record_invitee, recount, RecordOutcome, Recorded, Recount, Signup};

use tally_db::DbError;
use tally_rewards::RewardError;

/// Error types for invitation operations.
#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("invitation code not found: {0}")]
    CodeNotFound(String),

    #[error("invitation code expired: {0}")]
    CodeExpired(String),

    /// Malformed or abusive invitation: self-invite, inactive code, invitee
    /// linked elsewhere, per-IP limit reached.
    #[error("invalid invitation: {0}")]
    InvalidTrigger(String),

    /// Could not find an unused code string after several attempts.
    #[error("could not allocate a unique invitation code")]
    CodeSpaceExhausted,

    /// The store is locked or unreachable. Safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("reward error: {0}")]
    Reward(RewardError),

    #[error("storage error: {0}")]
    Storage(DbError),
}

impl InviteError {
    /// True when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, InviteError::StorageUnavailable(_))
    }
}

impl From<RewardError> for InviteError {
    fn from(e: RewardError) -> Self {
        match e {
            RewardError::StorageUnavailable(detail) => InviteError::StorageUnavailable(detail),
            other => InviteError::Reward(other),
        }
    }
}

impl From<DbError> for InviteError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Busy(detail) => InviteError::StorageUnavailable(detail),
            other => InviteError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for InviteError {
    fn from(e: rusqlite::Error) -> Self {
        InviteError::from(DbError::from(e))
    }
}

/// Convenience result type for invitation operations.
pub type Result<T> = std::result::Result<T, InviteError>;
