//! # tally-types
//!
//! Shared domain types for the points ledger workspace.
//!
//! Every crate that reads or writes the ledger speaks in these types: the
//! transaction taxonomy, membership tiers, reward trigger kinds, redemption
//! code kinds and the point-change events pushed to observers.

pub mod codes;
pub mod events;
pub mod ledger;
pub mod membership;
pub mod redemption;
pub mod rewards;

pub use ledger::{Balance, Transaction, TransactionType};
pub use membership::MembershipTier;
pub use redemption::RedemptionKind;
pub use rewards::TriggerKind;

/// Users are owned by the external auth system and referenced by id only.
pub type UserId = String;

/// Row id of an appended ledger transaction.
pub type TransactionId = i64;

/// Seconds in one calendar day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Error returned when a stored enum label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub label: String,
}

/// Day index of a timestamp, shifted by `offset_secs` so the day boundary
/// can sit on a local midnight instead of 00:00 UTC.
pub fn day_index(timestamp: u64, offset_secs: i64) -> u64 {
    let shifted = (timestamp as i64).saturating_add(offset_secs).max(0);
    shifted as u64 / SECONDS_PER_DAY
}

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
