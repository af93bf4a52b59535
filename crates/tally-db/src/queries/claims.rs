//! Reward claims: the idempotency ledger for one-time rewards.
//!
//! The `(trigger_kind, trigger_key)` uniqueness constraint is the only
//! guard against paying a trigger twice. Callers insert first and treat a
//! conflict as "already issued"; they never read-then-insert.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::rewards::RewardClaim;
use tally_types::{TransactionId, TriggerKind};

use crate::{parse_label, Result};

const COLUMNS: &str = "id, trigger_kind, trigger_key, user_id, amount, transaction_id, claimed_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<RewardClaim> {
    Ok(RewardClaim {
        id: row.get(0)?,
        trigger_kind: parse_label(1, row.get(1)?)?,
        trigger_key: row.get(2)?,
        user_id: row.get(3)?,
        amount: row.get(4)?,
        transaction_id: row.get(5)?,
        claimed_at: row.get::<_, i64>(6)? as u64,
    })
}

/// Reserve a claim. Returns the new claim id, or `None` if the trigger was
/// already claimed.
pub fn try_insert(
    conn: &Connection,
    kind: TriggerKind,
    key: &str,
    user_id: &str,
    amount: i64,
    now: u64,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT INTO reward_claims (trigger_kind, trigger_key, user_id, amount, claimed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(trigger_kind, trigger_key) DO NOTHING",
        rusqlite::params![kind.as_str(), key, user_id, amount, now as i64],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

/// Link a claim to the ledger entry that paid it.
pub fn set_transaction(conn: &Connection, claim_id: i64, tx_id: TransactionId) -> Result<()> {
    conn.execute(
        "UPDATE reward_claims SET transaction_id = ?2 WHERE id = ?1",
        rusqlite::params![claim_id, tx_id],
    )?;
    Ok(())
}

/// Look up a claim by its trigger.
pub fn find(conn: &Connection, kind: TriggerKind, key: &str) -> Result<Option<RewardClaim>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM reward_claims WHERE trigger_kind = ?1 AND trigger_key = ?2"
            ),
            rusqlite::params![kind.as_str(), key],
            from_row,
        )
        .optional()?)
}

/// All claims paid to a user, oldest first.
pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<RewardClaim>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM reward_claims WHERE user_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([user_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of claims of one kind paid to a user.
pub fn count_for_user(conn: &Connection, user_id: &str, kind: TriggerKind) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reward_claims WHERE user_id = ?1 AND trigger_kind = ?2",
        rusqlite::params![user_id, kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
