//! Daily allowance resets.
//!
//! A reset sets a member's points to their tier allowance by appending a
//! RESET transaction of `allowance - points`, which claws back unused
//! points or tops the balance up. `last_reset_day` makes it idempotent per
//! day.

use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::{balances, leases, settings};
use tally_ledger::{Applied, TransactionRequest};
use tally_types::{TransactionType, UserId};

use crate::status::status_in;
use crate::{MembershipError, MembershipPolicy, Result};

/// Lease name guarding [`batch_reset_all`].
pub const BATCH_LEASE: &str = "batch_reset";

/// Settings key holding the last day a batch reset completed.
pub const LAST_BATCH_DAY_KEY: &str = "last_batch_reset_day";

/// Outcome of one user's reset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResetOutcome {
    /// Points now equal the allowance. `applied` is `None` when they
    /// already did and no transaction was needed.
    Reset {
        points: i64,
        applied: Option<Applied>,
    },
    /// Already reset today.
    AlreadyReset,
    /// Not a member (or the membership just expired).
    NotMember,
}

/// Reset one user's points to their daily allowance if not yet done today.
pub fn reset_daily_allowance(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    user_id: &str,
    today: u64,
    now: u64,
) -> Result<ResetOutcome> {
    let tx = tally_db::immediate(conn)?;
    let status = status_in(&tx, policy, user_id, now)?;

    if !status.is_member {
        tx.commit()?;
        return Ok(ResetOutcome::NotMember);
    }
    if status.last_reset_day >= today {
        tracing::debug!(user_id, today, "allowance already reset");
        return Ok(ResetOutcome::AlreadyReset);
    }

    let delta = status.daily_allowance - status.points;
    let applied = if delta != 0 {
        Some(tally_ledger::apply_in(
            &tx,
            &TransactionRequest {
                user_id,
                tx_type: TransactionType::Reset,
                amount: delta,
                description: "daily allowance reset",
                related_id: None,
            },
            now,
        )?)
    } else {
        None
    };
    balances::set_last_reset_day(&tx, user_id, today, now)?;
    tx.commit()?;

    tracing::info!(user_id, today, delta, points = status.daily_allowance, "allowance reset");
    Ok(ResetOutcome::Reset {
        points: status.daily_allowance,
        applied,
    })
}

/// Tuning for [`batch_reset_all`].
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Identifies this process in the lease table.
    pub holder: String,
    /// Extra attempts per user after a transient failure.
    pub busy_retries: u32,
    /// Backoff step; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
    pub lease_ttl_secs: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            holder: format!("tally-{}", std::process::id()),
            busy_retries: 3,
            retry_backoff: Duration::from_millis(50),
            lease_ttl_secs: 900,
        }
    }
}

/// A user whose reset failed after all retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedReset {
    pub user_id: UserId,
    pub error: String,
}

/// Summary of one batch run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub day: u64,
    pub reset: u32,
    pub skipped: u32,
    pub failed: Vec<FailedReset>,
    /// Ledger entries written, for event emission.
    #[serde(skip)]
    pub changes: Vec<Applied>,
}

/// Reset every member not yet reset on `today`.
///
/// One user's failure never aborts the others; it is retried while
/// transient and otherwise recorded in [`BatchReport::failed`]. Fails with
/// [`MembershipError::BatchInProgress`] if another holder owns the lease.
pub fn batch_reset_all(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    opts: &BatchOptions,
    today: u64,
    now: u64,
) -> Result<BatchReport> {
    {
        let tx = tally_db::immediate(conn)?;
        if !leases::try_acquire(&tx, BATCH_LEASE, &opts.holder, now, opts.lease_ttl_secs)? {
            return Err(MembershipError::BatchInProgress);
        }
        tx.commit()?;
    }

    let result = run_batch(conn, policy, opts, today, now);

    if let Err(e) = leases::release(conn, BATCH_LEASE, &opts.holder) {
        tracing::warn!(error = %e, "failed to release batch lease");
    }
    result
}

fn run_batch(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    opts: &BatchOptions,
    today: u64,
    now: u64,
) -> Result<BatchReport> {
    let due = balances::due_for_reset(conn, today)?;
    let mut report = BatchReport {
        day: today,
        ..BatchReport::default()
    };

    for user_id in due {
        match reset_with_retry(conn, policy, opts, &user_id, today, now) {
            Ok(ResetOutcome::Reset { applied, .. }) => {
                report.reset += 1;
                report.changes.extend(applied);
            }
            Ok(ResetOutcome::AlreadyReset | ResetOutcome::NotMember) => report.skipped += 1,
            Err(e) => {
                tracing::error!(user_id = %user_id, today, error = %e, "allowance reset failed");
                report.failed.push(FailedReset {
                    user_id,
                    error: e.to_string(),
                });
            }
        }
    }

    settings::set(conn, LAST_BATCH_DAY_KEY, &today.to_string())?;
    tracing::info!(
        today,
        reset = report.reset,
        skipped = report.skipped,
        failed = report.failed.len(),
        "batch reset complete"
    );
    Ok(report)
}

fn reset_with_retry(
    conn: &mut Connection,
    policy: &MembershipPolicy,
    opts: &BatchOptions,
    user_id: &str,
    today: u64,
    now: u64,
) -> Result<ResetOutcome> {
    let mut attempt = 0;
    loop {
        match reset_daily_allowance(conn, policy, user_id, today, now) {
            Err(e) if e.is_transient() && attempt < opts.busy_retries => {
                attempt += 1;
                tracing::debug!(user_id, attempt, error = %e, "retrying allowance reset");
                std::thread::sleep(opts.retry_backoff * attempt);
            }
            other => return other,
        }
    }
}
