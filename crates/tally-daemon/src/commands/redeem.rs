//! Redemption command handlers.

use std::sync::Arc;

use serde_json::Value;
use tally_redeem::{CodeDefinition, Grant};
use tally_types::events::EventType;
use tally_types::{now_secs, TriggerKind};

use super::{optional_i64, required_str, reward_issued, run_blocking, to_json, Operation};
use crate::config::CODE_LENGTH_RANGE;
use crate::events::event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Most codes one `create_redemption_codes` call may generate.
const MAX_BATCH: i64 = 1000;

/// Consume a single-use code for a user.
pub async fn redeem_code(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let code = required_str(params, "code")?;
    let policy = state.config.membership.clone();
    let now = now_secs();

    let op = Operation::new("redeem_code").user(&user_id).trigger(&code);
    let (uid, value) = (user_id.clone(), code.clone());
    let redemption = run_blocking(state, op, move |conn| {
        tally_redeem::redeem(conn, &policy, &uid, &value, now)
    })
    .await?;

    match &redemption.grant {
        Grant::Points { applied } => {
            state.event_bus.emit(applied.event().into_event(now));
            state
                .event_bus
                .emit(reward_issued(applied, TriggerKind::Redemption, &code).into_event(now));
        }
        Grant::Membership { change } => {
            state.event_bus.emit(change.event().into_event(now));
        }
    }
    state.event_bus.emit(event(
        EventType::CodeRedeemed,
        now,
        serde_json::json!({"user_id": user_id, "code": code, "kind": redemption.kind}),
    ));

    to_json(&redemption)
}

/// Generate a batch of codes from one definition.
///
/// Params are the definition fields (`kind`, `value`, `membership_tier`,
/// `membership_days`, `expires_at`) plus `count` and `code_length`.
pub async fn create_redemption_codes(state: &Arc<DaemonState>, params: &Value) -> Result {
    let definition: CodeDefinition = serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(&format!("definition: {e}")))?;
    let count = optional_i64(params, "count")?.unwrap_or(1);
    if !(1..=MAX_BATCH).contains(&count) {
        return Err(RpcError::invalid_params(&format!(
            "count must be between 1 and {MAX_BATCH}"
        )));
    }
    let code_length = match optional_i64(params, "code_length")? {
        Some(len) if usize::try_from(len).is_ok_and(|l| CODE_LENGTH_RANGE.contains(&l)) => {
            len as usize
        }
        Some(_) => {
            return Err(RpcError::invalid_params(&format!(
                "code_length must be between {} and {}",
                CODE_LENGTH_RANGE.start(),
                CODE_LENGTH_RANGE.end()
            )))
        }
        None => state.config.invite.code_length,
    };
    let now = now_secs();

    let op = Operation::new("create_redemption_codes");
    let codes = run_blocking(state, op, move |conn| {
        tally_redeem::create_codes(conn, &definition, count as usize, code_length, now)
    })
    .await?;
    to_json(&codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ledger, test_support};

    #[tokio::test]
    async fn test_create_and_redeem_points() {
        let state = test_support::state();
        ledger::open_account(&state, &serde_json::json!({"user_id": "u1"}))
            .await
            .expect("open");

        let codes = create_redemption_codes(
            &state,
            &serde_json::json!({"kind": "points", "value": 100, "count": 2}),
        )
        .await
        .expect("create");
        let codes = codes.as_array().expect("array");
        assert_eq!(codes.len(), 2);
        let code = codes[0]["code"].as_str().expect("code").to_string();

        let redemption = redeem_code(&state, &serde_json::json!({"user_id": "u1", "code": code}))
            .await
            .expect("redeem");
        assert_eq!(redemption["grant"], "points");
        assert_eq!(redemption["applied"]["new_balance"], 100);

        let err = redeem_code(&state, &serde_json::json!({"user_id": "u1", "code": code}))
            .await
            .expect_err("reuse");
        assert_eq!(err.code, -32052);
    }

    #[tokio::test]
    async fn test_redeem_unknown_code() {
        let state = test_support::state();
        let err = redeem_code(&state, &serde_json::json!({"user_id": "u1", "code": "NOPE"}))
            .await
            .expect_err("unknown");
        assert_eq!(err.code, -32050);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_batches() {
        let state = test_support::state();
        let err = create_redemption_codes(
            &state,
            &serde_json::json!({"kind": "points", "value": 10, "count": 0}),
        )
        .await
        .expect_err("count");
        assert_eq!(err.code, -32602);

        let err = create_redemption_codes(&state, &serde_json::json!({"kind": "membership"}))
            .await
            .expect_err("no tier");
        assert_eq!(err.code, -32602);
    }
}
