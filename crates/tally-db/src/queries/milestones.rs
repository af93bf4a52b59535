//! Milestone configuration.

use rusqlite::{Connection, Row};
use tally_types::rewards::Milestone;

use crate::Result;

fn from_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        threshold: row.get(1)?,
        bonus_points: row.get(2)?,
        is_active: row.get(3)?,
    })
}

/// Replace the active milestone set with `(threshold, bonus_points)` pairs.
///
/// Existing rows keep their ids so that payouts keyed by milestone id stay
/// valid; thresholds no longer configured are deactivated, not deleted.
pub fn sync(conn: &Connection, milestones: &[(u32, i64)]) -> Result<()> {
    conn.execute("UPDATE milestones SET is_active = 0", [])?;
    let mut stmt = conn.prepare(
        "INSERT INTO milestones (threshold, bonus_points, is_active) VALUES (?1, ?2, 1)
         ON CONFLICT(threshold) DO UPDATE SET bonus_points = excluded.bonus_points, is_active = 1",
    )?;
    for (threshold, bonus) in milestones {
        stmt.execute(rusqlite::params![threshold, bonus])?;
    }
    Ok(())
}

/// Active milestones ordered by threshold ascending.
pub fn list_active(conn: &Connection) -> Result<Vec<Milestone>> {
    let mut stmt = conn.prepare(
        "SELECT id, threshold, bonus_points, is_active FROM milestones
         WHERE is_active = 1 ORDER BY threshold ASC",
    )?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
