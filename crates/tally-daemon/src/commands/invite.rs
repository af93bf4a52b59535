//! Invitation command handlers.

use std::sync::Arc;

use serde_json::Value;
use tally_invite::{Payout, RecordOutcome, RewardReconciliation, Signup};
use tally_types::events::EventType;
use tally_types::now_secs;

use super::{optional_str, required_str, run_blocking, to_json, Operation};
use crate::events::event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// The inviter's active code, created on first use.
pub async fn create_invite_code(state: &Arc<DaemonState>, params: &Value) -> Result {
    let inviter_id = required_str(params, "inviter_id")?;
    let policy = state.config.invite.clone();
    let now = now_secs();

    let op = Operation::new("create_invite_code").user(&inviter_id);
    let code = run_blocking(state, op, move |conn| {
        tally_invite::create_code(conn, &policy, &inviter_id, now)
    })
    .await?;
    to_json(&code)
}

pub async fn deactivate_invite_code(state: &Arc<DaemonState>, params: &Value) -> Result {
    let inviter_id = required_str(params, "inviter_id")?;
    let now = now_secs();

    let op = Operation::new("deactivate_invite_code").user(&inviter_id);
    let deactivated = run_blocking(state, op, move |conn| {
        tally_invite::deactivate_code(conn, &inviter_id, now)
    })
    .await?;
    Ok(serde_json::json!({ "deactivated": deactivated }))
}

/// Link a new user to the code they signed up with and pay the inviter.
pub async fn record_invitee(state: &Arc<DaemonState>, params: &Value) -> Result {
    let code = required_str(params, "code")?;
    let user_id = required_str(params, "user_id")?;
    let ip_address = optional_str(params, "ip_address");
    let user_agent = optional_str(params, "user_agent");
    let policy = state.config.invite.clone();
    let now = now_secs();

    let op = Operation::new("record_invitee").user(&user_id).trigger(&code);
    let invitee = user_id.clone();
    let outcome = run_blocking(state, op, move |conn| {
        let signup = Signup {
            code: &code,
            user_id: &invitee,
            ip_address: ip_address.as_deref(),
            user_agent: user_agent.as_deref(),
        };
        tally_invite::record_invitee(conn, &policy, &signup, now)
    })
    .await?;

    let recorded = match outcome {
        RecordOutcome::Recorded(recorded) => recorded,
        RecordOutcome::AlreadyRecorded => return Ok(serde_json::json!({ "applied": false })),
    };

    state.event_bus.emit(event(
        EventType::InviteeRecorded,
        now,
        serde_json::json!({
            "user_id": recorded.inviter_id,
            "invitee_id": user_id,
            "invitation_id": recorded.invitation_id,
            "successful_invitations": recorded.successful_invitations,
        }),
    ));
    emit_payouts(state, &recorded.payouts, now);

    Ok(serde_json::json!({
        "applied": true,
        "invitation": to_json(&recorded)?,
    }))
}

pub async fn get_invite_stats(state: &Arc<DaemonState>, params: &Value) -> Result {
    let inviter_id = required_str(params, "inviter_id")?;
    let op = Operation::new("get_invite_stats").user(&inviter_id);
    let stats = run_blocking(state, op, move |conn| {
        tally_invite::invite_stats(conn, &inviter_id)
    })
    .await?;
    to_json(&stats)
}

/// Pay every base bonus and milestone that is owed but unpaid.
pub async fn reconcile_rewards(state: &Arc<DaemonState>) -> Result {
    let report = run_reward_reconciliation(state, now_secs()).await?;
    to_json(&report)
}

/// Shared by the RPC method and the scheduler.
pub(crate) async fn run_reward_reconciliation(
    state: &Arc<DaemonState>,
    now: u64,
) -> std::result::Result<RewardReconciliation, RpcError> {
    let policy = state.config.invite.clone();
    let report = run_blocking(state, Operation::new("reconcile_rewards"), move |conn| {
        tally_invite::reconcile_rewards(conn, &policy, now)
    })
    .await?;

    emit_payouts(state, &report.base_bonuses, now);
    emit_payouts(state, &report.milestones, now);
    Ok(report)
}

fn emit_payouts(state: &DaemonState, payouts: &[Payout], now: u64) {
    for payout in payouts {
        state.event_bus.emit(payout.applied.event().into_event(now));
        state.event_bus.emit(payout.event().into_event(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ledger, test_support};

    #[tokio::test]
    async fn test_invite_flow() {
        let state = test_support::state();
        ledger::open_account(&state, &serde_json::json!({"user_id": "alice"}))
            .await
            .expect("open");

        let code = create_invite_code(&state, &serde_json::json!({"inviter_id": "alice"}))
            .await
            .expect("code");
        let code = code["code"].as_str().expect("code string").to_string();

        let params = serde_json::json!({"code": code, "user_id": "bob", "ip_address": "10.0.0.1"});
        let first = record_invitee(&state, &params).await.expect("record");
        assert_eq!(first["applied"], true);
        assert_eq!(first["invitation"]["payouts"][0]["applied"]["amount"], 20);

        let again = record_invitee(&state, &params).await.expect("record again");
        assert_eq!(again["applied"], false);

        let stats = get_invite_stats(&state, &serde_json::json!({"inviter_id": "alice"}))
            .await
            .expect("stats");
        assert_eq!(stats["successful_invitations"], 1);
        assert_eq!(stats["next_milestone"]["threshold"], 10);
    }

    #[tokio::test]
    async fn test_invite_errors() {
        let state = test_support::state();
        let err = record_invitee(
            &state,
            &serde_json::json!({"code": "NOSUCHCODE", "user_id": "bob"}),
        )
        .await
        .expect_err("unknown code");
        assert_eq!(err.code, -32050);

        let code = create_invite_code(&state, &serde_json::json!({"inviter_id": "alice"}))
            .await
            .expect("code");
        let err = record_invitee(
            &state,
            &serde_json::json!({"code": code["code"], "user_id": "alice"}),
        )
        .await
        .expect_err("self invite");
        assert_eq!(err.code, -32053);

        let deactivated =
            deactivate_invite_code(&state, &serde_json::json!({"inviter_id": "alice"}))
                .await
                .expect("deactivate");
        assert_eq!(deactivated["deactivated"], true);
    }

    #[tokio::test]
    async fn test_reconcile_rewards_pays_deferred_bonus() {
        let state = test_support::state();
        let code = create_invite_code(&state, &serde_json::json!({"inviter_id": "alice"}))
            .await
            .expect("code");
        let recorded = record_invitee(
            &state,
            &serde_json::json!({"code": code["code"], "user_id": "bob"}),
        )
        .await
        .expect("record");
        assert_eq!(recorded["invitation"]["deferred"], true);

        ledger::open_account(&state, &serde_json::json!({"user_id": "alice"}))
            .await
            .expect("open");
        let report = reconcile_rewards(&state).await.expect("reconcile");
        assert_eq!(report["base_bonuses"].as_array().expect("array").len(), 1);
    }
}
