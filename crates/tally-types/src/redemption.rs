//! Redemption code definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MembershipTier, ParseLabelError, UserId};

/// What a redemption code grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionKind {
    /// Grants `value` points.
    Points,
    /// Extends (or starts) membership by `membership_days`.
    MembershipDays,
    /// Sets `membership_tier` for `membership_days`.
    Membership,
}

impl RedemptionKind {
    pub const ALL: [RedemptionKind; 3] = [
        RedemptionKind::Points,
        RedemptionKind::MembershipDays,
        RedemptionKind::Membership,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RedemptionKind::Points => "points",
            RedemptionKind::MembershipDays => "membership_days",
            RedemptionKind::Membership => "membership",
        }
    }
}

impl fmt::Display for RedemptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedemptionKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseLabelError {
                kind: "redemption kind",
                label: s.to_string(),
            })
    }
}

/// A single-use redemption code. `is_used` only ever flips false → true.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct RedemptionCode {
    pub code: String,
    pub kind: RedemptionKind,
    /// Points granted by a `Points` code.
    pub value: i64,
    pub membership_tier: Option<MembershipTier>,
    pub membership_days: Option<u32>,
    pub is_used: bool,
    pub used_by: Option<UserId>,
    pub used_at: Option<u64>,
    pub expires_at: Option<u64>,
    pub created_at: u64,
}

impl RedemptionCode {
    /// Codes expire at `expires_at` inclusive.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        for kind in RedemptionKind::ALL {
            assert_eq!(kind.as_str().parse::<RedemptionKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let code = RedemptionCode {
            code: "ABC".into(),
            kind: RedemptionKind::Points,
            value: 100,
            membership_tier: None,
            membership_days: None,
            is_used: false,
            used_by: None,
            used_at: None,
            expires_at: Some(1000),
            created_at: 0,
        };
        assert!(!code.is_expired(999));
        assert!(code.is_expired(1000));

        let forever = RedemptionCode {
            expires_at: None,
            ..code
        };
        assert!(!forever.is_expired(u64::MAX));
    }
}
