//! Tier configuration.

use serde::{Deserialize, Serialize};
use tally_types::MembershipTier;

/// Allowance, price and plan length per tier.
///
/// Deserialized directly from the `[membership]` section of the daemon
/// config; every field has a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPolicy {
    #[serde(default)]
    pub free_allowance: i64,
    #[serde(default = "default_premium_allowance")]
    pub premium_allowance: i64,
    #[serde(default = "default_pro_allowance")]
    pub pro_allowance: i64,
    /// Length of one purchased plan.
    #[serde(default = "default_plan_days")]
    pub plan_days: u32,
    #[serde(default = "default_premium_price")]
    pub premium_price: i64,
    #[serde(default = "default_pro_price")]
    pub pro_price: i64,
}

fn default_premium_allowance() -> i64 {
    500
}
fn default_pro_allowance() -> i64 {
    2000
}
fn default_plan_days() -> u32 {
    30
}
fn default_premium_price() -> i64 {
    3000
}
fn default_pro_price() -> i64 {
    9000
}

impl Default for MembershipPolicy {
    fn default() -> Self {
        Self {
            free_allowance: 0,
            premium_allowance: default_premium_allowance(),
            pro_allowance: default_pro_allowance(),
            plan_days: default_plan_days(),
            premium_price: default_premium_price(),
            pro_price: default_pro_price(),
        }
    }
}

impl MembershipPolicy {
    pub fn allowance(&self, tier: MembershipTier) -> i64 {
        match tier {
            MembershipTier::Free => self.free_allowance,
            MembershipTier::Premium => self.premium_allowance,
            MembershipTier::Pro => self.pro_allowance,
        }
    }

    /// Points price of one plan, or `None` for tiers that cannot be bought.
    pub fn price(&self, tier: MembershipTier) -> Option<i64> {
        let price = match tier {
            MembershipTier::Free => return None,
            MembershipTier::Premium => self.premium_price,
            MembershipTier::Pro => self.pro_price,
        };
        (price > 0).then_some(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = MembershipPolicy::default();
        assert_eq!(policy.allowance(MembershipTier::Free), 0);
        assert_eq!(policy.allowance(MembershipTier::Premium), 500);
        assert_eq!(policy.allowance(MembershipTier::Pro), 2000);
        assert_eq!(policy.price(MembershipTier::Free), None);
        assert_eq!(policy.price(MembershipTier::Premium), Some(3000));
    }

    #[test]
    fn test_zero_price_not_for_sale() {
        let policy = MembershipPolicy {
            pro_price: 0,
            ..MembershipPolicy::default()
        };
        assert_eq!(policy.price(MembershipTier::Pro), None);
    }
}
