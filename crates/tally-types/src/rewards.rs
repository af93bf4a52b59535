//! Reward triggers and invitation records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ParseLabelError, TransactionId, UserId};

/// The class of external event a reward claim is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Signup,
    Invitation,
    Milestone,
    Redemption,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 4] = [
        TriggerKind::Signup,
        TriggerKind::Invitation,
        TriggerKind::Milestone,
        TriggerKind::Redemption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Signup => "signup",
            TriggerKind::Invitation => "invitation",
            TriggerKind::Milestone => "milestone",
            TriggerKind::Redemption => "redemption",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseLabelError {
                kind: "trigger kind",
                label: s.to_string(),
            })
    }
}

/// A recorded reward claim. At most one exists per `(trigger_kind, trigger_key)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct RewardClaim {
    pub id: i64,
    pub trigger_kind: TriggerKind,
    pub trigger_key: String,
    pub user_id: UserId,
    pub amount: i64,
    /// Ledger entry that paid the claim; `None` for membership grants.
    pub transaction_id: Option<TransactionId>,
    pub claimed_at: u64,
}

/// A shareable invitation code owned by one inviter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct InvitationCode {
    pub id: i64,
    pub inviter_id: UserId,
    pub code: String,
    pub total_invitations: u32,
    pub successful_invitations: u32,
    pub is_active: bool,
    pub expires_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl InvitationCode {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Invitation lifecycle. Signup is the completion event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Completed,
}

impl InvitationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Completed => "completed",
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "completed" => Ok(InvitationStatus::Completed),
            other => Err(ParseLabelError {
                kind: "invitation status",
                label: other.to_string(),
            }),
        }
    }
}

/// One invitee linked to one invitation code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct Invitation {
    pub id: i64,
    pub invitation_code_id: i64,
    pub invited_user_id: UserId,
    pub status: InvitationStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

/// A successful-invitation threshold that unlocks a one-time bonus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct Milestone {
    pub id: i64,
    pub threshold: u32,
    pub bonus_points: i64,
    pub is_active: bool,
}
