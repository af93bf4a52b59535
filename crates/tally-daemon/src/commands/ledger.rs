//! Ledger command handlers.

use std::sync::Arc;

use serde_json::Value;
use tally_ledger::TransactionRequest;
use tally_rewards::{RewardError, RewardRequest, Trigger};
use tally_types::events::EventType;
use tally_types::{now_secs, MembershipTier, TransactionType, TriggerKind};

use super::{
    optional_i64, optional_str, required_i64, required_label, required_str, reward_issued,
    run_blocking, to_json, Operation,
};
use crate::events::event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

/// Create a user's balance row, paying the signup bonus once if configured.
pub async fn open_account(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let allowance = state.config.membership.allowance(MembershipTier::Free);
    let signup_bonus = state.config.ledger.signup_bonus;
    let now = now_secs();
    let today = state.config.today(now);

    let op = Operation::new("open_account").user(&user_id).trigger(&user_id);
    let uid = user_id.clone();
    let (created, bonus) = run_blocking(state, op, move |conn| {
        let tx = tally_db::immediate(conn)?;
        let created = tally_ledger::open_account_in(&tx, &uid, allowance, today, now)?;
        let bonus = if signup_bonus > 0 {
            let issuance = tally_rewards::issue_in(
                &tx,
                &RewardRequest {
                    trigger: &Trigger::signup(&uid),
                    user_id: &uid,
                    amount: signup_bonus,
                    tx_type: TransactionType::Bonus,
                    description: "signup bonus",
                },
                now,
            )?;
            issuance.applied().cloned()
        } else {
            None
        };
        tx.commit()?;
        Ok::<_, RewardError>((created, bonus))
    })
    .await?;

    if let Some(ref applied) = bonus {
        state.event_bus.emit(applied.event().into_event(now));
        state
            .event_bus
            .emit(reward_issued(applied, TriggerKind::Signup, &user_id).into_event(now));
    }

    Ok(serde_json::json!({
        "user_id": user_id,
        "created": created,
        "signup_bonus": to_json(&bonus)?,
    }))
}

/// Current balance and membership row.
pub async fn get_balance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let op = Operation::new("get_balance").user(&user_id);
    let balance = run_blocking(state, op, move |conn| {
        tally_ledger::engine::balance(conn, &user_id)
    })
    .await?;
    to_json(&balance)
}

/// A page of a user's transactions, newest first.
///
/// Pass the returned `next_before` as `before` to fetch the next page.
pub async fn get_transactions(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let limit = optional_i64(params, "limit")?
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, MAX_PAGE) as u32;
    let before = optional_i64(params, "before")?;

    let op = Operation::new("get_transactions").user(&user_id);
    let page = run_blocking(state, op, move |conn| {
        // Distinguish an unknown user from an empty history.
        tally_ledger::engine::balance(conn, &user_id)?;
        tally_ledger::engine::history(conn, &user_id, limit, before)
    })
    .await?;

    let next_before = (page.len() == limit as usize)
        .then(|| page.last().map(|t| t.id))
        .flatten();
    Ok(serde_json::json!({
        "transactions": to_json(&page)?,
        "next_before": next_before,
    }))
}

/// Apply one ledger transaction.
pub async fn apply_transaction(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let tx_type: TransactionType = required_label(params, "type")?;
    let amount = required_i64(params, "amount")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let related_id = optional_str(params, "related_id");
    let now = now_secs();

    let op = Operation::new("apply_transaction").user(&user_id);
    let applied = run_blocking(state, op, move |conn| {
        tally_ledger::apply_transaction(
            conn,
            &TransactionRequest {
                user_id: &user_id,
                tx_type,
                amount,
                description: &description,
                related_id: related_id.as_deref(),
            },
            now,
        )
    })
    .await?;

    state.event_bus.emit(applied.event().into_event(now));
    to_json(&applied)
}

/// Return points after a failed downstream call.
pub async fn refund(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let amount = required_i64(params, "amount")?;
    let description = optional_str(params, "description").unwrap_or_else(|| "refund".into());
    let related_id = optional_str(params, "related_id");
    let now = now_secs();

    let op = Operation::new("refund")
        .user(&user_id)
        .trigger(related_id.as_deref().unwrap_or_default());
    let applied = run_blocking(state, op, move |conn| {
        tally_ledger::engine::refund(
            conn,
            &user_id,
            amount,
            &description,
            related_id.as_deref(),
            now,
        )
    })
    .await?;

    state.event_bus.emit(applied.event().into_event(now));
    to_json(&applied)
}

/// Compare cached balances with the transaction log.
///
/// With `user_id`, reports that user; without, reports every mismatch.
pub async fn reconcile(state: &Arc<DaemonState>, params: &Value) -> Result {
    let now = now_secs();
    let reports = match optional_str(params, "user_id") {
        Some(user_id) => {
            let op = Operation::new("reconcile").user(&user_id);
            let report = run_blocking(state, op, move |conn| {
                tally_ledger::reconcile::reconcile(conn, &user_id)
            })
            .await?;
            vec![report]
        }
        None => {
            run_blocking(state, Operation::new("reconcile"), |conn| {
                tally_ledger::reconcile::reconcile_all(conn)
            })
            .await?
        }
    };

    let mismatches: Vec<_> = reports.iter().filter(|r| !r.is_consistent()).collect();
    for report in &mismatches {
        state
            .event_bus
            .emit(event(EventType::LedgerMismatch, now, to_json(report)?));
    }

    Ok(serde_json::json!({
        "consistent": mismatches.is_empty(),
        "reports": to_json(&reports)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support;
    use crate::config::TallyConfig;

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let state = test_support::state();
        let params = serde_json::json!({"user_id": "u1"});

        let first = open_account(&state, &params).await.expect("open");
        assert_eq!(first["created"], true);
        let second = open_account(&state, &params).await.expect("open again");
        assert_eq!(second["created"], false);
    }

    #[tokio::test]
    async fn test_signup_bonus_paid_once() {
        let mut config = TallyConfig::default();
        config.ledger.signup_bonus = 50;
        let state = test_support::state_with(config);
        let mut events = state.event_bus.subscribe();
        let params = serde_json::json!({"user_id": "u1"});

        let first = open_account(&state, &params).await.expect("open");
        assert_eq!(first["signup_bonus"]["amount"], 50);
        let second = open_account(&state, &params).await.expect("open again");
        assert!(second["signup_bonus"].is_null());

        let balance = get_balance(&state, &params).await.expect("balance");
        assert_eq!(balance["points"], 50);

        let points = events.try_recv().expect("points event");
        assert_eq!(points.event_type, EventType::PointsChanged);
        let reward = events.try_recv().expect("reward event");
        assert_eq!(reward.event_type, EventType::RewardIssued);
        assert_eq!(reward.payload["trigger_kind"], "signup");
    }

    #[tokio::test]
    async fn test_apply_and_page_transactions() {
        let state = test_support::state();
        open_account(&state, &serde_json::json!({"user_id": "u1"}))
            .await
            .expect("open");

        for amount in [30, -10, 5] {
            let tx_type = if amount > 0 { "bonus" } else { "usage" };
            apply_transaction(
                &state,
                &serde_json::json!({"user_id": "u1", "type": tx_type, "amount": amount}),
            )
            .await
            .expect("apply");
        }

        let page = get_transactions(&state, &serde_json::json!({"user_id": "u1", "limit": 2}))
            .await
            .expect("page");
        let txs = page["transactions"].as_array().expect("array");
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0]["amount"], 5);

        let rest = get_transactions(
            &state,
            &serde_json::json!({"user_id": "u1", "before": page["next_before"]}),
        )
        .await
        .expect("rest");
        assert_eq!(rest["transactions"].as_array().expect("array").len(), 1);
        assert!(rest["next_before"].is_null());
    }

    #[tokio::test]
    async fn test_overdraft_maps_to_insufficient_balance() {
        let state = test_support::state();
        open_account(&state, &serde_json::json!({"user_id": "u1"}))
            .await
            .expect("open");

        let err = apply_transaction(
            &state,
            &serde_json::json!({"user_id": "u1", "type": "usage", "amount": -1}),
        )
        .await
        .expect_err("overdraft");
        assert_eq!(err.code, -32040);

        let err = apply_transaction(
            &state,
            &serde_json::json!({"user_id": "u1", "type": "teleport", "amount": 1}),
        )
        .await
        .expect_err("bad type");
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_refund_and_reconcile() {
        let state = test_support::state();
        open_account(&state, &serde_json::json!({"user_id": "u1"}))
            .await
            .expect("open");
        let applied = refund(
            &state,
            &serde_json::json!({"user_id": "u1", "amount": -15, "related_id": "call-9"}),
        )
        .await
        .expect("refund");
        assert_eq!(applied["amount"], 15);
        assert_eq!(applied["tx_type"], "refund");

        let report = reconcile(&state, &serde_json::json!({"user_id": "u1"}))
            .await
            .expect("reconcile");
        assert_eq!(report["consistent"], true);
        assert_eq!(report["reports"][0]["ledger_sum"], 15);

        let all = reconcile(&state, &serde_json::json!({})).await.expect("all");
        assert_eq!(all["reports"].as_array().expect("array").len(), 0);
    }
}
