//! Membership tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseLabelError;

/// Entitlement level. The allowance attached to each tier is configuration,
/// not per-user data.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS,
)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    #[default]
    Free,
    Premium,
    Pro,
}

impl MembershipTier {
    pub const ALL: [MembershipTier; 3] = [
        MembershipTier::Free,
        MembershipTier::Premium,
        MembershipTier::Pro,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MembershipTier::Free => "free",
            MembershipTier::Premium => "premium",
            MembershipTier::Pro => "pro",
        }
    }

    /// Paid tiers carry an expiry and a daily reset.
    pub fn is_paid(self) -> bool {
        !matches!(self, MembershipTier::Free)
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipTier {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseLabelError {
                kind: "membership tier",
                label: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_labels() {
        for tier in MembershipTier::ALL {
            assert_eq!(tier.as_str().parse::<MembershipTier>(), Ok(tier));
        }
        assert!("gold".parse::<MembershipTier>().is_err());
    }

    #[test]
    fn test_paid_tiers() {
        assert!(!MembershipTier::Free.is_paid());
        assert!(MembershipTier::Premium.is_paid());
        assert!(MembershipTier::Pro.is_paid());
    }
}
