//! Balance rows: cached points plus membership state.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::{Balance, MembershipTier, UserId};

use crate::{parse_label, DbError, Result};

const COLUMNS: &str = "user_id, points, tier, daily_allowance, last_reset_day, is_member,
                       membership_expires_at, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Balance> {
    Ok(Balance {
        user_id: row.get(0)?,
        points: row.get(1)?,
        tier: parse_label(2, row.get(2)?)?,
        daily_allowance: row.get(3)?,
        last_reset_day: row.get::<_, i64>(4)? as u64,
        is_member: row.get(5)?,
        membership_expires_at: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        created_at: row.get::<_, i64>(7)? as u64,
        updated_at: row.get::<_, i64>(8)? as u64,
    })
}

/// Create a FREE balance row with zero points if none exists.
///
/// Returns `true` if a row was created.
pub fn insert_if_absent(
    conn: &Connection,
    user_id: &str,
    daily_allowance: i64,
    today: u64,
    now: u64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO balances (user_id, points, tier, daily_allowance, last_reset_day,
                               is_member, created_at, updated_at)
         VALUES (?1, 0, ?2, ?3, ?4, 0, ?5, ?5)
         ON CONFLICT(user_id) DO NOTHING",
        rusqlite::params![
            user_id,
            MembershipTier::Free.as_str(),
            daily_allowance,
            today as i64,
            now as i64,
        ],
    )?;
    Ok(inserted == 1)
}

/// Look up a balance row.
pub fn find(conn: &Connection, user_id: &str) -> Result<Option<Balance>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM balances WHERE user_id = ?1"),
            [user_id],
            from_row,
        )
        .optional()?)
}

/// Get a balance row, failing with `NotFound` if the user has no account.
pub fn get(conn: &Connection, user_id: &str) -> Result<Balance> {
    find(conn, user_id)?.ok_or_else(|| DbError::NotFound(format!("balance for user '{user_id}'")))
}

/// Current cached points, if the account exists.
pub fn points(conn: &Connection, user_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT points FROM balances WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Add `delta` to the cached points unless the result would be negative.
///
/// Returns `false` when the guard rejected the update (or the row is
/// missing); the caller distinguishes the two.
pub fn add_points_guarded(conn: &Connection, user_id: &str, delta: i64, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE balances SET points = points + ?1, updated_at = ?3
         WHERE user_id = ?2 AND points + ?1 >= 0",
        rusqlite::params![delta, user_id, now as i64],
    )?;
    Ok(updated == 1)
}

/// Overwrite the membership columns of a balance row.
pub fn set_membership(
    conn: &Connection,
    user_id: &str,
    tier: MembershipTier,
    expires_at: Option<u64>,
    daily_allowance: i64,
    now: u64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE balances
         SET tier = ?2, is_member = ?3, membership_expires_at = ?4,
             daily_allowance = ?5, updated_at = ?6
         WHERE user_id = ?1",
        rusqlite::params![
            user_id,
            tier.as_str(),
            tier.is_paid(),
            expires_at.map(|v| v as i64),
            daily_allowance,
            now as i64,
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("balance for user '{user_id}'")));
    }
    Ok(())
}

/// Record that the allowance was reset on `day`.
pub fn set_last_reset_day(conn: &Connection, user_id: &str, day: u64, now: u64) -> Result<()> {
    conn.execute(
        "UPDATE balances SET last_reset_day = ?2, updated_at = ?3 WHERE user_id = ?1",
        rusqlite::params![user_id, day as i64, now as i64],
    )?;
    Ok(())
}

/// Members whose allowance has not been reset on `today`.
pub fn due_for_reset(conn: &Connection, today: u64) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM balances
         WHERE is_member = 1 AND last_reset_day < ?1
         ORDER BY user_id",
    )?;
    let rows = stmt
        .query_map([today as i64], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every account id.
pub fn all_user_ids(conn: &Connection) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare("SELECT user_id FROM balances ORDER BY user_id")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
