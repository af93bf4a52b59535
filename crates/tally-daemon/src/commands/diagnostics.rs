//! Diagnostics command handlers.

use std::sync::Arc;

use serde_json::Value;
use tally_types::now_secs;

use super::{run_blocking, Operation};
use crate::rpc::RpcError;
use crate::scheduler::last_batch_day;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Version, uptime and scheduler progress.
pub async fn get_daemon_status(state: &Arc<DaemonState>) -> Result {
    let now = now_secs();
    let last_batch_reset_day =
        run_blocking(state, Operation::new("get_daemon_status"), |conn| {
            last_batch_day(conn)
        })
        .await?;

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "instance": state.holder,
        "uptime_secs": now.saturating_sub(state.started_at),
        "today": state.config.today(now),
        "last_batch_reset_day": last_batch_reset_day,
        "pool_size": state.pool.size(),
        "events_emitted": state.event_bus.sequence(),
        "scheduler_enabled": state.config.scheduler.enabled,
    }))
}
