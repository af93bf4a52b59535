//! Daily job scheduler.
//!
//! Wakes every `interval_secs`. When the day index has moved past the last
//! completed batch reset it runs, in order:
//! 1. Daily allowance batch reset
//! 2. Invitation reward reconciliation

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tally_db::queries::settings;
use tally_db::DbError;
use tally_membership::reset::LAST_BATCH_DAY_KEY;
use tally_membership::BatchReport;
use tally_types::now_secs;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::commands::invite::run_reward_reconciliation;
use crate::commands::membership::run_batch_reset;
use crate::commands::{run_blocking, Operation};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Run until a shutdown signal arrives.
pub async fn run(state: Arc<DaemonState>, mut shutdown: broadcast::Receiver<()>) {
    let period = Duration::from_secs(state.config.scheduler.interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    info!(interval_secs = period.as_secs(), "scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick(&state, now_secs()).await {
                    warn!(code = e.code, message = %e.message, "scheduled run failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    info!("scheduler stopped");
}

/// One scheduler pass. Returns the batch report if the day's jobs ran.
pub(crate) async fn tick(
    state: &Arc<DaemonState>,
    now: u64,
) -> Result<Option<BatchReport>, RpcError> {
    let today = state.config.today(now);
    let last = run_blocking(state, Operation::new("scheduler"), |conn| {
        last_batch_day(conn)
    })
    .await?;
    if !is_due(last, today) {
        return Ok(None);
    }

    info!(today, ?last, "running daily jobs");
    let report = run_batch_reset(state, now).await?;
    let rewards = run_reward_reconciliation(state, now).await?;
    info!(
        today,
        reset = report.reset,
        failed = report.failed.len(),
        repaid = rewards.base_bonuses.len() + rewards.milestones.len(),
        "daily jobs complete"
    );
    Ok(Some(report))
}

fn is_due(last: Option<u64>, today: u64) -> bool {
    !matches!(last, Some(day) if day >= today)
}

/// Day of the last completed batch reset, if any ran.
pub(crate) fn last_batch_day(conn: &Connection) -> tally_db::Result<Option<u64>> {
    match settings::get(conn, LAST_BATCH_DAY_KEY) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| DbError::Serialization(e.to_string())),
        Err(DbError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
