//! Membership command handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tally_membership::{BatchOptions, BatchReport, ResetOutcome};
use tally_types::events::EventType;
use tally_types::{now_secs, MembershipTier};

use super::{optional_i64, required_label, required_str, run_blocking, to_json, Operation};
use crate::events::event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Membership status, applying a lapsed expiry first.
pub async fn get_membership(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let policy = state.config.membership.clone();
    let now = now_secs();

    let op = Operation::new("get_membership").user(&user_id);
    let status = run_blocking(state, op, move |conn| {
        tally_membership::membership_status(conn, &policy, &user_id, now)
    })
    .await?;
    to_json(&status)
}

/// Buy a plan with points.
///
/// `points_cost` defaults to the configured price of the tier.
pub async fn purchase_membership(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let tier: MembershipTier = required_label(params, "tier")?;
    let policy = state.config.membership.clone();
    let points_cost = match optional_i64(params, "points_cost")? {
        Some(cost) => cost,
        None => policy
            .price(tier)
            .ok_or_else(|| RpcError::invalid_params(&format!("{tier} cannot be purchased")))?,
    };
    let now = now_secs();

    let op = Operation::new("purchase_membership")
        .user(&user_id)
        .trigger(tier.as_str());
    let purchase = run_blocking(state, op, move |conn| {
        tally_membership::purchase_membership(conn, &policy, &user_id, tier, points_cost, now)
    })
    .await?;

    state.event_bus.emit(purchase.debit.event().into_event(now));
    state.event_bus.emit(purchase.change.event().into_event(now));
    to_json(&purchase)
}

/// Reset one member to their allowance if not yet done today.
pub async fn reset_daily_allowance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let policy = state.config.membership.clone();
    let now = now_secs();
    let today = state.config.today(now);

    let op = Operation::new("reset_daily_allowance").user(&user_id);
    let uid = user_id.clone();
    let outcome = run_blocking(state, op, move |conn| {
        tally_membership::reset_daily_allowance(conn, &policy, &uid, today, now)
    })
    .await?;

    if let ResetOutcome::Reset { points, applied } = &outcome {
        if let Some(applied) = applied {
            state.event_bus.emit(applied.event().into_event(now));
        }
        state.event_bus.emit(event(
            EventType::AllowanceReset,
            now,
            serde_json::json!({"user_id": user_id, "day": today, "points": points}),
        ));
    }
    to_json(&outcome)
}

/// Reset every member due today.
pub async fn batch_reset_all(state: &Arc<DaemonState>) -> Result {
    let report = run_batch_reset(state, now_secs()).await?;
    to_json(&report)
}

/// Run the batch reset for the day containing `now` and publish its
/// changes. Shared by the RPC method and the scheduler.
pub(crate) async fn run_batch_reset(
    state: &Arc<DaemonState>,
    now: u64,
) -> std::result::Result<BatchReport, RpcError> {
    let policy = state.config.membership.clone();
    let opts = BatchOptions {
        holder: state.holder.clone(),
        busy_retries: state.config.storage.busy_retries,
        retry_backoff: Duration::from_millis(state.config.storage.retry_backoff_ms),
        ..BatchOptions::default()
    };
    let today = state.config.today(now);

    let report = run_blocking(state, Operation::new("batch_reset_all"), move |conn| {
        tally_membership::batch_reset_all(conn, &policy, &opts, today, now)
    })
    .await?;

    state
        .event_bus
        .emit_all(report.changes.iter().map(|applied| applied.event().into_event(now)));
    state.event_bus.emit(event(
        EventType::BatchResetComplete,
        now,
        serde_json::json!({
            "day": report.day,
            "reset": report.reset,
            "skipped": report.skipped,
            "failed": report.failed.len(),
        }),
    ));
    Ok(report)
}
