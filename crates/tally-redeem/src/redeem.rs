//! Consuming a code.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::redemption_codes;
use tally_ledger::Applied;
use tally_membership::{MembershipChange, MembershipPolicy};
use tally_rewards::{Issuance, RewardRequest, Trigger};
use tally_types::{MembershipTier, RedemptionKind, TransactionType, UserId};

use crate::{RedeemError, Result};

/// What a redemption granted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "grant", rename_all = "snake_case")]
pub enum Grant {
    Points { applied: Applied },
    Membership { change: MembershipChange },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub code: String,
    pub user_id: UserId,
    pub kind: RedemptionKind,
    #[serde(flatten)]
    pub grant: Grant,
}

/// Redeem `code` for `user_id`.
///
/// # Errors
///
/// - [`RedeemError::CodeNotFound`], [`RedeemError::CodeExpired`],
///   [`RedeemError::CodeAlreadyUsed`]
/// - [`RedeemError::UserNotFound`] if the user has no account; the code
///   stays unused
pub fn redeem(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    code: &str,
    now: u64,
) -> Result<Redemption> {
    let tx = tally_db::immediate(conn)?;

    let def = redemption_codes::find(&tx, code)?
        .ok_or_else(|| RedeemError::CodeNotFound(code.to_string()))?;
    if def.is_expired(now) {
        return Err(RedeemError::CodeExpired(code.to_string()));
    }
    if def.is_used || !redemption_codes::mark_used(&tx, code, user_id, now)? {
        tracing::debug!(user_id, code, "code already used");
        return Err(RedeemError::CodeAlreadyUsed(code.to_string()));
    }

    let trigger = Trigger::redemption(code);
    let grant = match def.kind {
        RedemptionKind::Points => {
            let description = format!("redeemed code {code}");
            let issuance = tally_rewards::issue_in(
                &tx,
                &RewardRequest {
                    trigger: &trigger,
                    user_id,
                    amount: def.value,
                    tx_type: TransactionType::Redeem,
                    description: &description,
                },
                now,
            )?;
            match issuance {
                Issuance::Issued { applied, .. } => Grant::Points { applied },
                Issuance::AlreadyIssued => {
                    return Err(RedeemError::CodeAlreadyUsed(code.to_string()))
                }
            }
        }
        RedemptionKind::MembershipDays => {
            let days = def
                .membership_days
                .filter(|d| *d > 0)
                .ok_or_else(|| RedeemError::InvalidCode(code.to_string()))?;
            reserve(&tx, &trigger, user_id, now)?;
            let default_tier = def.membership_tier.unwrap_or(MembershipTier::Premium);
            let change = tally_membership::extend_membership_in(
                &tx,
                policy,
                user_id,
                days,
                default_tier,
                now,
            )?;
            Grant::Membership { change }
        }
        RedemptionKind::Membership => {
            let tier = def
                .membership_tier
                .ok_or_else(|| RedeemError::InvalidCode(code.to_string()))?;
            let days = def.membership_days.unwrap_or(policy.plan_days);
            reserve(&tx, &trigger, user_id, now)?;
            let change =
                tally_membership::grant_membership_in(&tx, policy, user_id, tier, days, now)?;
            Grant::Membership { change }
        }
    };
    tx.commit()?;

    tracing::info!(user_id, code, kind = %def.kind, "code redeemed");
    Ok(Redemption {
        code: code.to_string(),
        user_id: user_id.to_string(),
        kind: def.kind,
        grant,
    })
}

fn reserve(conn: &Connection, trigger: &Trigger, user_id: &str, now: u64) -> Result<()> {
    match tally_rewards::reserve_in(conn, trigger, user_id, now)? {
        Some(_) => Ok(()),
        None => Err(RedeemError::CodeAlreadyUsed(trigger.key.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_codes, get_code, CodeDefinition};
    use tally_ledger::TransactionRequest;
    use tally_types::SECONDS_PER_DAY;

    fn test_db(points: i64) -> Connection {
        let mut conn = tally_db::open_memory().expect("open");
        tally_ledger::open_account(&mut conn, "u1", 0, 0, 0).expect("account");
        if points > 0 {
            tally_ledger::apply_transaction(
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

    fn make_code(conn: &mut Connection, def: CodeDefinition) -> String {
        create_codes(conn, &def, 1, 8, 0)
            .expect("create")
            .remove(0)
            .code
    }

    fn points_def(value: i64) -> CodeDefinition {
        CodeDefinition {
            kind: RedemptionKind::Points,
            value,
            membership_tier: None,
            membership_days: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_points_code() {
        let mut conn = test_db(25);
        let code = make_code(&mut conn, points_def(100));

        let redemption =
            redeem(&mut conn, &MembershipPolicy::default(), "u1", &code, 10).expect("redeem");
        let Grant::Points { applied } = &redemption.grant else {
            panic!("expected a points grant");
        };
        assert_eq!(applied.amount, 100);
        assert_eq!(applied.new_balance, 125);
        assert_eq!(applied.tx_type, TransactionType::Redeem);

        let stored = get_code(&conn, &code).expect("get").expect("code");
        assert!(stored.is_used);
        assert_eq!(stored.used_by.as_deref(), Some("u1"));
        assert_eq!(stored.used_at, Some(10));
    }

    #[test]
    fn test_second_redeem_fails() {
        let mut conn = test_db(0);
        let code = make_code(&mut conn, points_def(50));
        let policy = MembershipPolicy::default();

        redeem(&mut conn, &policy, "u1", &code, 1).expect("first");
        assert!(matches!(
            redeem(&mut conn, &policy, "u1", &code, 2),
            Err(RedeemError::CodeAlreadyUsed(_))
        ));
        assert_eq!(
            tally_ledger::engine::balance(&conn, "u1").expect("balance").points,
            50
        );
    }

    #[test]
    fn test_missing_and_expired() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        assert!(matches!(
            redeem(&mut conn, &policy, "u1", "NOPE", 1),
            Err(RedeemError::CodeNotFound(_))
        ));

        let code = make_code(
            &mut conn,
            CodeDefinition {
                expires_at: Some(100),
                ..points_def(10)
            },
        );
        assert!(matches!(
            redeem(&mut conn, &policy, "u1", &code, 100),
            Err(RedeemError::CodeExpired(_))
        ));
        assert!(!get_code(&conn, &code).expect("get").expect("code").is_used);
    }

    #[test]
    fn test_unknown_user_leaves_code_unused() {
        let mut conn = test_db(0);
        let code = make_code(&mut conn, points_def(10));
        let policy = MembershipPolicy::default();

        assert!(matches!(
            redeem(&mut conn, &policy, "ghost", &code, 1),
            Err(RedeemError::UserNotFound(_))
        ));
        assert!(!get_code(&conn, &code).expect("get").expect("code").is_used);
        redeem(&mut conn, &policy, "u1", &code, 2).expect("redeem after rollback");
    }

    #[test]
    fn test_membership_days_code() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        let code = make_code(
            &mut conn,
            CodeDefinition {
                kind: RedemptionKind::MembershipDays,
                membership_days: Some(7),
                ..points_def(0)
            },
        );

        let redemption = redeem(&mut conn, &policy, "u1", &code, SECONDS_PER_DAY).expect("redeem");
        let Grant::Membership { change } = redemption.grant else {
            panic!("expected a membership grant");
        };
        assert_eq!(change.tier, MembershipTier::Premium);
        assert_eq!(change.expires_at, 8 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_membership_days_extends_current_tier() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        tally_membership::grant_membership(&mut conn, &policy, "u1", MembershipTier::Pro, 10, 0)
            .expect("grant");
        let code = make_code(
            &mut conn,
            CodeDefinition {
                kind: RedemptionKind::MembershipDays,
                membership_days: Some(5),
                ..points_def(0)
            },
        );

        let redemption = redeem(&mut conn, &policy, "u1", &code, 1).expect("redeem");
        let Grant::Membership { change } = redemption.grant else {
            panic!("expected a membership grant");
        };
        assert_eq!(change.tier, MembershipTier::Pro);
        assert_eq!(change.expires_at, 15 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_membership_code_uses_plan_days() {
        let mut conn = test_db(0);
        let policy = MembershipPolicy::default();
        let code = make_code(
            &mut conn,
            CodeDefinition {
                kind: RedemptionKind::Membership,
                membership_tier: Some(MembershipTier::Pro),
                ..points_def(0)
            },
        );

        let redemption = redeem(&mut conn, &policy, "u1", &code, 0).expect("redeem");
        let Grant::Membership { change } = redemption.grant else {
            panic!("expected a membership grant");
        };
        assert_eq!(change.tier, MembershipTier::Pro);
        assert_eq!(change.expires_at, 30 * SECONDS_PER_DAY);
        assert!(tally_rewards::find_claim(&conn, &Trigger::redemption(&code))
            .expect("find")
            .is_some());
    }

    #[test]
    fn test_concurrent_redeem_single_winner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tally.db");
        let code = {
            let mut conn = tally_db::open(&path).expect("open");
            for user in ["a", "b", "c", "d"] {
                tally_ledger::open_account(&mut conn, user, 0, 0, 0).expect("account");
            }
            make_code(&mut conn, points_def(100))
        };

        let workers: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|user| {
                let path = path.clone();
                let code = code.clone();
                std::thread::spawn(move || {
                    let mut conn = tally_db::open(&path).expect("open worker");
                    redeem(&mut conn, &MembershipPolicy::default(), user, &code, 5)
                })
            })
            .collect();

        let mut ok = 0;
        for worker in workers {
            match worker.join().expect("join") {
                Ok(_) => ok += 1,
                Err(RedeemError::CodeAlreadyUsed(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);

        let conn = tally_db::open(&path).expect("open");
        let total: i64 = ["a", "b", "c", "d"]
            .iter()
            .map(|u| {
                tally_ledger::engine::balance(&conn, u)
                    .expect("balance")
                    .points
            })
            .sum();
        assert_eq!(total, 100);
    }
}
