//! Balance and transaction records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MembershipTier, ParseLabelError, TransactionId, UserId};

/// Why a ledger transaction happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Feature usage deduction.
    Usage,
    /// Invitation, milestone or signup bonus.
    Bonus,
    /// Points returned after a failed downstream call.
    Refund,
    /// Redemption code grant or membership purchase.
    Redeem,
    /// Daily allowance reset.
    Reset,
    /// Manual adjustment by an operator.
    Admin,
}

impl TransactionType {
    pub const ALL: [TransactionType; 6] = [
        TransactionType::Usage,
        TransactionType::Bonus,
        TransactionType::Refund,
        TransactionType::Redeem,
        TransactionType::Reset,
        TransactionType::Admin,
    ];

    /// Label stored in the `transactions.tx_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Usage => "usage",
            TransactionType::Bonus => "bonus",
            TransactionType::Refund => "refund",
            TransactionType::Redeem => "redeem",
            TransactionType::Reset => "reset",
            TransactionType::Admin => "admin",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseLabelError {
                kind: "transaction type",
                label: s.to_string(),
            })
    }
}

/// An immutable ledger entry. Never updated or deleted once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    /// Signed point delta.
    pub amount: i64,
    pub description: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: u64,
    /// Invitation id, milestone key or redemption code that caused this entry.
    pub related_id: Option<String>,
}

/// A user's cached balance and membership entitlement.
///
/// `points` is a cache of the sum of the user's transaction amounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct Balance {
    pub user_id: UserId,
    pub points: i64,
    pub tier: MembershipTier,
    pub daily_allowance: i64,
    /// Day index of the last allowance reset.
    pub last_reset_day: u64,
    pub is_member: bool,
    pub membership_expires_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}
