//! Membership status, grants and purchases.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::balances;
use tally_ledger::{Applied, TransactionRequest};
use tally_types::events::MembershipChanged;
use tally_types::{Balance, MembershipTier, TransactionType, UserId, SECONDS_PER_DAY};

use crate::{MembershipError, MembershipPolicy, Result};

/// Membership as seen after expiry has been applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MembershipStatus {
    pub user_id: UserId,
    pub tier: MembershipTier,
    pub is_member: bool,
    pub expires_at: Option<u64>,
    pub daily_allowance: i64,
    pub last_reset_day: u64,
    pub points: i64,
}

impl From<Balance> for MembershipStatus {
    fn from(b: Balance) -> Self {
        Self {
            user_id: b.user_id,
            tier: b.tier,
            is_member: b.is_member,
            expires_at: b.membership_expires_at,
            daily_allowance: b.daily_allowance,
            last_reset_day: b.last_reset_day,
            points: b.points,
        }
    }
}

/// A committed tier or expiry change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub user_id: UserId,
    pub previous_tier: MembershipTier,
    pub tier: MembershipTier,
    pub expires_at: u64,
}

impl MembershipChange {
    pub fn event(&self) -> MembershipChanged {
        MembershipChanged {
            user_id: self.user_id.clone(),
            tier: self.tier,
            expires_at: Some(self.expires_at),
        }
    }
}

/// Result of a successful purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Purchase {
    pub debit: Applied,
    pub change: MembershipChange,
}

/// Read a user's membership, persisting a downgrade to FREE if it expired.
pub fn membership_status(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    now: u64,
) -> Result<MembershipStatus> {
    let tx = tally_db::immediate(conn)?;
    let status = status_in(&tx, policy, user_id, now)?;
    tx.commit()?;
    Ok(status)
}

/// [`membership_status`] inside the caller's transaction.
pub(crate) fn status_in(
    conn: &Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    now: u64,
) -> Result<MembershipStatus> {
    let balance = balances::find(conn, user_id)?
        .ok_or_else(|| MembershipError::UserNotFound(user_id.to_string()))?;

    let lapsed = balance.is_member
        && !matches!(balance.membership_expires_at, Some(expires_at) if expires_at > now);
    if !lapsed {
        return Ok(balance.into());
    }

    let free = MembershipTier::Free;
    balances::set_membership(conn, user_id, free, None, policy.allowance(free), now)?;
    tracing::info!(
        user_id,
        tier = %balance.tier,
        expired_at = ?balance.membership_expires_at,
        "membership expired"
    );

    Ok(MembershipStatus {
        tier: free,
        is_member: false,
        expires_at: None,
        daily_allowance: policy.allowance(free),
        ..balance.into()
    })
}

/// Grant `days` of `tier`.
///
/// An active membership of the same tier is extended; anything else
/// (no membership, another tier) restarts the clock at `now`. The new
/// allowance takes effect at the next daily reset.
pub fn grant_membership(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    tier: MembershipTier,
    days: u32,
    now: u64,
) -> Result<MembershipChange> {
    let tx = tally_db::immediate(conn)?;
    let change = grant_membership_in(&tx, policy, user_id, tier, days, now)?;
    tx.commit()?;
    Ok(change)
}

/// [`grant_membership`] inside the caller's transaction.
pub fn grant_membership_in(
    conn: &Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    tier: MembershipTier,
    days: u32,
    now: u64,
) -> Result<MembershipChange> {
    if !tier.is_paid() {
        return Err(MembershipError::InvalidTier(tier));
    }
    if days == 0 {
        return Err(MembershipError::InvalidDuration);
    }

    let current = status_in(conn, policy, user_id, now)?;
    let span = u64::from(days) * SECONDS_PER_DAY;
    let expires_at = match current.expires_at {
        Some(current_expiry) if current.is_member && current.tier == tier => {
            current_expiry.saturating_add(span)
        }
        _ => now.saturating_add(span),
    };

    balances::set_membership(
        conn,
        user_id,
        tier,
        Some(expires_at),
        policy.allowance(tier),
        now,
    )?;
    tracing::info!(
        user_id,
        previous_tier = %current.tier,
        %tier,
        days,
        expires_at,
        "membership granted"
    );

    Ok(MembershipChange {
        user_id: user_id.to_string(),
        previous_tier: current.tier,
        tier,
        expires_at,
    })
}

/// Add `days` to the current membership without changing its tier.
///
/// Users without an active membership receive `default_tier`.
pub fn extend_membership_in(
    conn: &Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    days: u32,
    default_tier: MembershipTier,
    now: u64,
) -> Result<MembershipChange> {
    let current = status_in(conn, policy, user_id, now)?;
    let tier = if current.is_member {
        current.tier
    } else {
        default_tier
    };
    grant_membership_in(conn, policy, user_id, tier, days, now)
}

/// Buy one plan of `tier` for `points_cost` points.
///
/// The debit and the tier change commit together or not at all.
pub fn purchase_membership(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    tier: MembershipTier,
    points_cost: i64,
    now: u64,
) -> Result<Purchase> {
    if !tier.is_paid() || points_cost <= 0 {
        return Err(MembershipError::InvalidTier(tier));
    }

    let tx = tally_db::immediate(conn)?;
    let description = format!("membership purchase: {tier}, {} days", policy.plan_days);
    let debit = tally_ledger::apply_in(
        &tx,
        &TransactionRequest {
            user_id,
            tx_type: TransactionType::Redeem,
            amount: -points_cost,
            description: &description,
            related_id: Some(tier.as_str()),
        },
        now,
    )?;
    let change = grant_membership_in(&tx, policy, user_id, tier, policy.plan_days, now)?;
    tx.commit()?;

    Ok(Purchase { debit, change })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ledger::apply_transaction;

    const DAY: u64 = SECONDS_PER_DAY;

    fn test_db(points: i64) -> Connection {
        let mut conn = tally_db::open_memory().expect("open test db");
        tally_ledger::open_account(&mut conn, "u1", 0, 0, 0).expect("account");
        if points > 0 {
            apply_transaction(
                &mut conn,
                &TransactionRequest {
                    user_id: "u1",
                    tx_type: TransactionType::Bonus,
                    amount: points,
                    description: "seed",
                    related_id: None,
                },
                0,
            )
            .expect("seed");
        }
        conn
    }

    #[test]
    fn test_new_user_is_free() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        let status = membership_status(&mut conn, &policy, "u1", 10).expect("status");
        assert_eq!(status.tier, MembershipTier::Free);
        assert!(!status.is_member);
        assert_eq!(status.expires_at, None);
    }

    #[test]
    fn test_grant_then_extend_same_tier() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();

        let first = grant_membership(&mut conn, &policy, "u1", MembershipTier::Premium, 30, DAY)
            .expect("grant");
        assert_eq!(first.previous_tier, MembershipTier::Free);
        assert_eq!(first.expires_at, 31 * DAY);

        let second = grant_membership(&mut conn, &policy, "u1", MembershipTier::Premium, 10, 2 * DAY)
            .expect("extend");
        assert_eq!(second.expires_at, 41 * DAY);

        let status = membership_status(&mut conn, &policy, "u1", 2 * DAY).expect("status");
        assert!(status.is_member);
        assert_eq!(status.daily_allowance, 500);
    }

    #[test]
    fn test_grant_other_tier_restarts() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        grant_membership(&mut conn, &policy, "u1", MembershipTier::Premium, 30, 0).expect("grant");

        let change = grant_membership(&mut conn, &policy, "u1", MembershipTier::Pro, 7, 5 * DAY)
            .expect("switch");
        assert_eq!(change.previous_tier, MembershipTier::Premium);
        assert_eq!(change.expires_at, 12 * DAY);
    }

    #[test]
    fn test_lazy_expiry_persists() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        grant_membership(&mut conn, &policy, "u1", MembershipTier::Pro, 1, 0).expect("grant");

        let status = membership_status(&mut conn, &policy, "u1", DAY).expect("expired");
        assert_eq!(status.tier, MembershipTier::Free);
        assert_eq!(status.daily_allowance, 0);

        let stored = balances::get(&conn, "u1").expect("row");
        assert!(!stored.is_member);
        assert_eq!(stored.tier, MembershipTier::Free);
        assert_eq!(stored.membership_expires_at, None);
    }

    #[test]
    fn test_renewal_after_expiry_restarts() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        grant_membership(&mut conn, &policy, "u1", MembershipTier::Premium, 1, 0).expect("grant");

        let change = grant_membership(&mut conn, &policy, "u1", MembershipTier::Premium, 1, 3 * DAY)
            .expect("renew");
        assert_eq!(change.previous_tier, MembershipTier::Free);
        assert_eq!(change.expires_at, 4 * DAY);
    }

    #[test]
    fn test_extend_keeps_tier() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        grant_membership(&mut conn, &policy, "u1", MembershipTier::Pro, 2, 0).expect("grant");

        let change = extend_membership_in(&conn, &policy, "u1", 3, MembershipTier::Premium, DAY)
            .expect("extend");
        assert_eq!(change.tier, MembershipTier::Pro);
        assert_eq!(change.expires_at, 5 * DAY);
    }

    #[test]
    fn test_free_and_zero_days_rejected() {
        let conn = test_db(0);
        let policy = MembershipPolicy::default();
        assert!(matches!(
            grant_membership_in(&conn, &policy, "u1", MembershipTier::Free, 3, 0),
            Err(MembershipError::InvalidTier(MembershipTier::Free))
        ));
        assert!(matches!(
            grant_membership_in(&conn, &policy, "u1", MembershipTier::Pro, 0, 0),
            Err(MembershipError::InvalidDuration)
        ));
    }

    #[test]
    fn test_purchase_debits_and_upgrades() {
        let mut conn = test_db(3500);
        let policy = MembershipPolicy::default();

        let purchase =
            purchase_membership(&mut conn, &policy, "u1", MembershipTier::Premium, 3000, DAY)
                .expect("purchase");
        assert_eq!(purchase.debit.amount, -3000);
        assert_eq!(purchase.debit.new_balance, 500);
        assert_eq!(purchase.change.tier, MembershipTier::Premium);
        assert_eq!(purchase.change.expires_at, 31 * DAY);
    }

    #[test]
    fn test_purchase_without_funds_changes_nothing() {
        let mut conn = test_db(100);
        let policy = MembershipPolicy::default();

        let err = purchase_membership(&mut conn, &policy, "u1", MembershipTier::Pro, 9000, DAY)
            .expect_err("too poor");
        assert!(matches!(
            err,
            MembershipError::InsufficientBalance {
                required: 9000,
                available: 100
            }
        ));

        let stored = balances::get(&conn, "u1").expect("row");
        assert_eq!(stored.points, 100);
        assert_eq!(stored.tier, MembershipTier::Free);
        assert!(!stored.is_member);
    }
}
