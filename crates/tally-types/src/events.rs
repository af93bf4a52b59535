//! Events pushed to observers after a ledger mutation commits.
//!
//! Events are advisory. Observers use them to refresh UI state or drop
//! caches; the ledger itself never depends on delivery.

use serde::{Deserialize, Serialize};

use crate::{MembershipTier, TransactionId, TransactionType, TriggerKind, UserId};

/// Envelope for all daemon events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

/// All event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Ledger events
    PointsChanged,
    LedgerMismatch,

    // Membership events
    MembershipChanged,
    AllowanceReset,

    // Reward events
    RewardIssued,
    InviteeRecorded,
    CodeRedeemed,

    // System events
    DaemonStarted,
    BatchResetComplete,
}

impl EventType {
    /// Subscription category of this event.
    pub fn category(self) -> &'static str {
        match self {
            EventType::PointsChanged | EventType::LedgerMismatch => "ledger",
            EventType::MembershipChanged | EventType::AllowanceReset => "membership",
            EventType::RewardIssued | EventType::InviteeRecorded | EventType::CodeRedeemed => {
                "rewards"
            }
            EventType::DaemonStarted | EventType::BatchResetComplete => "system",
        }
    }
}

/// A committed change to one user's balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct PointsChanged {
    pub user_id: UserId,
    pub delta: i64,
    pub new_balance: i64,
    pub reason: TransactionType,
    pub transaction_id: TransactionId,
}

/// A committed change to one user's membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct MembershipChanged {
    pub user_id: UserId,
    pub tier: MembershipTier,
    pub expires_at: Option<u64>,
}

/// A reward claim that was paid for the first time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct RewardIssued {
    pub user_id: UserId,
    pub trigger_kind: TriggerKind,
    pub trigger_key: String,
    pub amount: i64,
}

impl PointsChanged {
    /// Wrap into an event envelope.
    pub fn into_event(self, timestamp: u64) -> Event {
        Event {
            event_type: EventType::PointsChanged,
            timestamp,
            payload: serde_json::to_value(self).unwrap_or_default(),
        }
    }
}

impl MembershipChanged {
    pub fn into_event(self, timestamp: u64) -> Event {
        Event {
            event_type: EventType::MembershipChanged,
            timestamp,
            payload: serde_json::to_value(self).unwrap_or_default(),
        }
    }
}

impl RewardIssued {
    pub fn into_event(self, timestamp: u64) -> Event {
        Event {
            event_type: EventType::RewardIssued,
            timestamp,
            payload: serde_json::to_value(self).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(EventType::PointsChanged.category(), "ledger");
        assert_eq!(EventType::AllowanceReset.category(), "membership");
        assert_eq!(EventType::CodeRedeemed.category(), "rewards");
        assert_eq!(EventType::DaemonStarted.category(), "system");
    }

    #[test]
    fn test_points_changed_envelope() {
        let event = PointsChanged {
            user_id: "u1".into(),
            delta: -5,
            new_balance: 20,
            reason: TransactionType::Usage,
            transaction_id: 7,
        }
        .into_event(1000);

        assert_eq!(event.event_type, EventType::PointsChanged);
        assert_eq!(event.payload["user_id"], "u1");
        assert_eq!(event.payload["delta"], -5);
        assert_eq!(event.payload["reason"], "usage");
    }
}
